//! Shared helpers for command handlers.

use std::time::Duration;

use skipper_core::Controller;

use crate::error::CliError;

/// Grace added to the discovery retry window when waiting for a connection.
const CONNECT_GRACE: Duration = Duration::from_secs(2);

/// Connect and wait until the stream is up.
///
/// `wait_secs` overrides the default wait: the full discovery retry window
/// plus a short grace.
pub async fn connect(controller: &Controller, wait_secs: Option<u64>) -> Result<(), CliError> {
    controller.connect().await?;
    let wait = wait_secs.map_or_else(|| controller.connect_window(CONNECT_GRACE), Duration::from_secs);
    controller.wait_connected(wait).await?;
    Ok(())
}

/// Resolves on Ctrl-C. A failure to install the handler never resolves.
pub async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
