//! `skipper status`: connect and report every status channel.

use std::time::Duration;

use serde::Serialize;

use skipper_core::{ConnectionStatus, Controller, EndpointStatus, SelfIdentity, StreamStatus};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// The hello frame usually follows the open event closely.
const IDENTITY_WAIT: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct StatusReport {
    connection: ConnectionStatus,
    endpoint: Option<EndpointStatus>,
    stream: StreamStatus,
    identity: Option<SelfIdentity>,
}

pub async fn handle(
    controller: &Controller,
    args: &StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let connected = util::connect(controller, args.wait).await;
    if connected.is_ok() {
        let mut identity = controller.self_identity();
        let _ = tokio::time::timeout(IDENTITY_WAIT, identity.wait_for(Option::is_some)).await;
    }

    let report = StatusReport {
        connection: controller.connection_status().borrow().clone(),
        endpoint: controller.endpoint().borrow().clone(),
        stream: controller.stream_status().borrow().clone(),
        identity: controller.self_identity().borrow().clone(),
    };
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| detail(r, color),
        |r| r.connection.state.to_string(),
    );
    output::print_output(&out, global.quiet);
    connected
}

fn detail(report: &StatusReport, color: bool) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    let _ = writeln!(out, "Connection  {}", output::status_line(&report.connection, color));
    if report.connection.retry_count > 0 {
        let _ = writeln!(
            out,
            "Retries     {}/{}",
            report.connection.retry_count, report.connection.max_retries
        );
    }
    if let Some(ref endpoint) = report.endpoint {
        if let Some(ref server) = endpoint.server_description {
            let _ = writeln!(out, "Server      {server}");
        }
        if let Some(ref http) = endpoint.http_service_url {
            let _ = writeln!(out, "HTTP        {http}");
        }
        if let Some(ref ws) = endpoint.ws_service_url {
            let _ = writeln!(out, "Stream URL  {ws}");
        }
        if let Some(ref history) = endpoint.history_url {
            let _ = writeln!(out, "History     {history}");
        }
    }
    let _ = writeln!(
        out,
        "Stream      {} ({})",
        report.stream.message, report.stream.operation
    );
    if let Some(id) = report.identity.as_ref().and_then(|i| i.self_id.as_deref()) {
        let _ = writeln!(out, "Self        {id}");
    }
    out.trim_end().to_owned()
}
