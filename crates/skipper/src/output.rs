//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one line per item.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use skipper_core::{ConnectionStatus, Severity, ZoneState};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// A connection status line, colored by severity.
pub fn status_line(status: &ConnectionStatus, color: bool) -> String {
    let text = format!("{} ({}): {}", status.state, status.legacy_code, status.message);
    if !color {
        return text;
    }
    match status.severity() {
        Severity::Success => text.green().to_string(),
        Severity::Info => text.cyan().to_string(),
        Severity::Warning => text.yellow().to_string(),
        Severity::Error => text.red().bold().to_string(),
    }
}

/// A zone state label, colored when it is not normal.
pub fn zone_label(state: ZoneState, color: bool) -> String {
    let text = state.to_string();
    if !color {
        return text;
    }
    match state {
        ZoneState::Normal => text,
        ZoneState::Warning => text.yellow().to_string(),
        ZoneState::Alarm => text.red().bold().to_string(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `plain`: calls `line_fn` on each item
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    line_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => data.iter().map(&line_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Render a single item. Table rendering uses `detail_fn`.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    line_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => line_fn(data),
    }
}

/// Render one event of a live feed. JSON formats emit one compact line.
pub fn render_event<T>(format: &OutputFormat, data: &T, line_fn: impl Fn(&T) -> String) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Table | OutputFormat::Plain => line_fn(data),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Compact display of a JSON value: strings unquoted, `-` for none.
pub fn value_text(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => "-".into(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|e| format!("{{\"error\":\"serialization failed: {e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_text_formats() {
        assert_eq!(value_text(None), "-");
        assert_eq!(value_text(Some(&json!(null))), "-");
        assert_eq!(value_text(Some(&json!("AIS"))), "AIS");
        assert_eq!(value_text(Some(&json!(3.2))), "3.2");
    }

    #[test]
    fn plain_list_is_one_line_per_item() {
        #[derive(serde::Serialize)]
        struct Item {
            name: &'static str,
        }
        #[derive(Tabled)]
        struct Row {
            name: &'static str,
        }
        let items = [Item { name: "a" }, Item { name: "b" }];
        let out = render_list(
            &OutputFormat::Plain,
            &items,
            |i| Row { name: i.name },
            |i| i.name.to_owned(),
        );
        assert_eq!(out, "a\nb");
    }
}
