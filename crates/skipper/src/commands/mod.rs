//! Command handlers.

pub mod config_cmd;
pub mod paths;
pub mod series;
pub mod status;
pub mod util;
pub mod validate;
pub mod watch;

use skipper_core::{ConnectionConfig, Controller};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a connection-backed command to its handler.
pub async fn dispatch(
    cmd: Command,
    config: ConnectionConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let controller = Controller::new(config)?;

    let result = match cmd {
        Command::Status(args) => status::handle(&controller, &args, global).await,
        Command::Watch(args) => watch::handle(&controller, &args, global).await,
        Command::Paths(args) => paths::handle(&controller, &args, global).await,
        Command::Series(args) => series::handle(&controller, &args, global).await,
        other => Err(CliError::Validation {
            field: "command".into(),
            reason: format!("{other:?} does not use a connection"),
        }),
    };

    controller.disconnect().await;
    result
}
