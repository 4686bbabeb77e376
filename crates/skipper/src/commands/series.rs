//! `skipper series <path>`: follow a sampled time series.

use chrono::{DateTime, Utc};
use tabled::Tabled;

use skipper_core::{Controller, DatasetConfig, DatasetEvent, DatasetSample};

use crate::cli::{GlobalOpts, SeriesArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "SMA")]
    sma: String,
    #[tabled(rename = "EMA")]
    ema: String,
    #[tabled(rename = "DEMA")]
    double_ema: String,
    #[tabled(rename = "Avg")]
    average: String,
    #[tabled(rename = "Min")]
    minimum: String,
    #[tabled(rename = "Max")]
    maximum: String,
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v:.3}"))
}

fn time(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .map_or_else(|| timestamp.to_string(), |t| t.format("%H:%M:%S").to_string())
}

fn row(sample: &DatasetSample) -> SampleRow {
    SampleRow {
        time: time(sample.timestamp),
        value: number(Some(sample.value)),
        sma: number(sample.sma),
        ema: number(sample.ema),
        double_ema: number(sample.double_ema),
        average: number(sample.running_average),
        minimum: number(sample.running_minimum),
        maximum: number(sample.running_maximum),
    }
}

fn line(sample: &DatasetSample) -> String {
    let r = row(sample);
    format!(
        "{} value={} sma={} ema={} dema={} avg={} min={} max={}",
        r.time, r.value, r.sma, r.ema, r.double_ema, r.average, r.minimum, r.maximum
    )
}

/// A saved series following `path` from `source`.
fn find_saved<'a>(saved: &'a [DatasetConfig], path: &str, source: &str) -> Option<&'a DatasetConfig> {
    saved.iter().find(|c| c.path == path && c.source == source)
}

pub async fn handle(
    controller: &Controller,
    args: &SeriesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::connect(controller, None).await?;

    let datasets = controller.datasets();
    let saved = config::saved_series(global);
    if let Some((ref profile, ref series)) = saved {
        let restored = datasets.restore(series.iter().cloned()).await;
        tracing::debug!(profile = %profile, restored, "restored saved series");
    }

    let resumed = saved
        .as_ref()
        .and_then(|(_, series)| find_saved(series, &args.path, &args.source))
        .filter(|c| datasets.config(&c.uuid).is_some())
        .cloned();
    let config = match resumed {
        Some(config) => {
            tracing::info!(uuid = %config.uuid, "resuming saved series");
            config
        }
        None if args.save => {
            let Some((profile, mut series)) = saved else {
                return Err(CliError::Validation {
                    field: "save".into(),
                    reason: "saving a series needs a profile; create one with: skipper config init --server <URL>".into(),
                });
            };
            let config = DatasetConfig::new(&args.path, &args.source, args.time_scale)
                .with_domain(args.domain);
            datasets.register(config.clone()).await?;
            series.push(config.clone());
            config::save_datasets(&profile, &series)?;
            tracing::info!(uuid = %config.uuid, profile = %profile, "series saved");
            config
        }
        None => {
            datasets
                .create(&args.path, &args.source, args.time_scale, args.domain)
                .await?
        }
    };
    tracing::info!(
        uuid = %config.uuid,
        sample_ms = config.sample_time,
        points = config.max_data_points,
        period = config.period(),
        "series started"
    );
    let mut stream = datasets.subscribe(&config.uuid).await?;

    let mut live = 0usize;
    loop {
        let event = tokio::select! {
            () = util::interrupted() => break,
            event = stream.next() => event,
        };
        match event {
            Some(DatasetEvent::Batch(samples)) => {
                if !samples.is_empty() {
                    let out = output::render_list(&global.output, &samples, row, line);
                    output::print_output(&out, global.quiet);
                }
            }
            Some(DatasetEvent::Live(sample)) => {
                let out = output::render_event(&global.output, &sample, line);
                output::print_output(&out, global.quiet);
                live += 1;
                if args.count.is_some_and(|count| live >= count) {
                    break;
                }
            }
            None => break,
        }
    }

    datasets.remove(&config.uuid)?;
    Ok(())
}
