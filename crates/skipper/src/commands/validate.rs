//! `skipper validate <url>`: pre-flight check of a server URL.

use serde::Serialize;

use skipper_core::Controller;

use crate::cli::{GlobalOpts, ValidateArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Validated {
    url: String,
    server: String,
    server_id: Option<String>,
    server_version: Option<String>,
}

pub async fn handle(args: &ValidateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let connection = config::adhoc_connection_config(&args.url, global)?;
    let controller = Controller::new(connection)?;
    let info = controller.validate_url(&args.url).await?;

    let result = Validated {
        url: args.url.clone(),
        server: info.description(),
        server_id: info.id,
        server_version: info.version,
    };
    let out = output::render_single(
        &global.output,
        &result,
        |v| format!("{} is a Signal K server ({})", v.url, v.server),
        |v| v.url.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
