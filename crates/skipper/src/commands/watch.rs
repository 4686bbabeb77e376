//! `skipper watch <path>...`: follow live values.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::select_all;
use serde::Serialize;
use serde_json::Value;

use skipper_core::{Controller, PathUpdate, ZoneState};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

const CONSUMER: &str = "skipper-watch";

#[derive(Serialize)]
struct WatchEvent {
    path: String,
    value: Option<Value>,
    unit: Option<String>,
    state: ZoneState,
    timestamp: Option<DateTime<Utc>>,
}

pub async fn handle(
    controller: &Controller,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::connect(controller, None).await?;

    let mut paths = args.paths.clone();
    paths.sort();
    paths.dedup();

    let streams = paths.iter().map(|path| {
        let path = path.clone();
        controller
            .subscribe_path(CONSUMER, &path, &args.source)
            .into_stream()
            .map(move |update| (path.clone(), update))
    });
    let mut updates = select_all(streams);

    let color = output::should_color(&global.color);
    let mut printed = 0usize;
    loop {
        tokio::select! {
            () = util::interrupted() => break,
            next = updates.next() => {
                let Some((path, update)) = next else { break };
                if is_unreported(&update) {
                    continue;
                }
                let event = WatchEvent {
                    unit: controller.store().path_unit(&path),
                    path,
                    value: update.value,
                    state: update.state,
                    timestamp: update.timestamp,
                };
                let out = output::render_event(&global.output, &event, |e| line(e, color));
                output::print_output(&out, global.quiet);

                printed += 1;
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    for path in &paths {
        controller.store().unsubscribe(CONSUMER, path);
    }
    Ok(())
}

/// A slot that has never seen a value.
fn is_unreported(update: &PathUpdate) -> bool {
    update.value.is_none() && update.timestamp.is_none()
}

fn line(event: &WatchEvent, color: bool) -> String {
    let time = event
        .timestamp
        .map_or_else(|| "--:--:--".into(), |t| t.format("%H:%M:%S").to_string());
    let unit = event.unit.as_deref().map(|u| format!(" {u}")).unwrap_or_default();
    let state = if event.state == ZoneState::Normal {
        String::new()
    } else {
        format!(" [{}]", output::zone_label(event.state, color))
    };
    format!(
        "{time} {} = {}{unit}{state}",
        event.path,
        output::value_text(event.value.as_ref())
    )
}
