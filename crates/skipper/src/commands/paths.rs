//! `skipper paths`: list the paths a server has reported.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use skipper_core::{Controller, ValueType, ZoneState};

use crate::cli::{GlobalOpts, PathsArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct PathEntry {
    path: String,
    value_type: Option<ValueType>,
    value: Option<Value>,
    unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    default_source: Option<String>,
    sources: Vec<String>,
    state: ZoneState,
}

#[derive(Tabled)]
struct PathRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Type")]
    value_type: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "State")]
    state: String,
}

fn row(entry: &PathEntry) -> PathRow {
    let value = output::value_text(entry.value.as_ref());
    PathRow {
        path: entry.path.clone(),
        value_type: entry
            .value_type
            .map_or_else(|| "-".into(), |t| t.to_string()),
        value: match entry.unit {
            Some(ref unit) => format!("{value} {unit}"),
            None => value,
        },
        source: entry.default_source.clone().unwrap_or_else(|| "-".into()),
        state: entry.state.to_string(),
    }
}

pub async fn handle(
    controller: &Controller,
    args: &PathsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::connect(controller, None).await?;

    // Deltas trickle in after connecting; give them a moment.
    tokio::select! {
        () = util::interrupted() => {}
        () = tokio::time::sleep(Duration::from_secs(args.wait)) => {}
    }

    let store = controller.store();
    let entries: Vec<PathEntry> = store
        .paths_by_type(args.value_type, args.self_only)
        .into_iter()
        .filter_map(|path| store.path_record(&path))
        .map(|record| PathEntry {
            unit: record.meta.as_ref().and_then(|m| m.units()).map(str::to_owned),
            display_name: record
                .meta
                .as_ref()
                .and_then(|m| m.display_name())
                .map(str::to_owned),
            description: record
                .meta
                .as_ref()
                .and_then(|m| m.description())
                .map(str::to_owned),
            path: record.path,
            value_type: record.value_type,
            value: record.current_value,
            default_source: record.default_source,
            sources: record.sources.into_keys().collect(),
            state: record.state,
        })
        .collect();

    let out = output::render_list(&global.output, &entries, row, |e| e.path.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}
