// ── History backfill ──
//
// One-shot history query issued when a series starts, so charts open with
// data. Only series sampled at whole-second resolution are seeded. Any
// failure degrades to live-only operation.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::BoxFuture;
use skipper_api::{HistoryClient, HistoryQuery, HistoryResponse};
use tracing::{debug, warn};

use crate::model::{DatasetConfig, ValueDomain};

/// Shortest sample interval the history API can serve, in milliseconds.
pub const MIN_HISTORY_SAMPLE_MS: u64 = 1000;

const SELF_PREFIX: &str = "self.";

/// Where backfill rows come from. Implemented for [`HistoryClient`];
/// tests substitute their own.
pub trait HistorySource: Send + Sync {
    fn values(&self, query: HistoryQuery) -> BoxFuture<'_, Result<HistoryResponse, skipper_api::Error>>;
}

impl HistorySource for HistoryClient {
    fn values(&self, query: HistoryQuery) -> BoxFuture<'_, Result<HistoryResponse, skipper_api::Error>> {
        Box::pin(async move { HistoryClient::values(self, &query).await })
    }
}

pub fn should_seed_history(config: &DatasetConfig) -> bool {
    config.sample_time >= MIN_HISTORY_SAMPLE_MS
}

/// Query resolution: the sample interval rounded up to whole seconds.
pub fn history_resolution_secs(sample_time_ms: u64) -> u64 {
    sample_time_ms.div_ceil(1000)
}

/// The query covering one full buffer ending at `now`.
///
/// `self.` paths query the own vessel; other paths carry their context in
/// the first two segments (`vessels.urn:mrn:imo:mmsi:111.navigation...`).
pub fn history_query(config: &DatasetConfig, now: DateTime<Utc>) -> HistoryQuery {
    let (context, path) = match config.path.strip_prefix(SELF_PREFIX) {
        Some(path) => (None, path.to_owned()),
        None => split_context(&config.path),
    };
    let method = match config.value_domain {
        ValueDomain::Scalar => "average",
        ValueDomain::Direction => "last",
    };

    let points = u64::try_from(config.max_data_points).unwrap_or(u64::MAX);
    let span_ms = i64::try_from(points.saturating_mul(config.sample_time)).unwrap_or(i64::MAX);
    let from = now
        .checked_sub_signed(ChronoDuration::milliseconds(span_ms))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    HistoryQuery {
        paths: vec![format!("{path}:{method}")],
        context,
        from: Some(from),
        to: Some(now),
        duration: None,
        resolution: Some(history_resolution_secs(config.sample_time)),
    }
}

fn split_context(path: &str) -> (Option<String>, String) {
    let mut parts = path.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(id), Some(rest)) => (Some(format!("{kind}.{id}")), rest.to_owned()),
        _ => (None, path.to_owned()),
    }
}

/// `(timestamp_ms, value)` pairs from the first value column. Null cells
/// are skipped, as they are for live values.
pub fn rows_to_points(response: &HistoryResponse) -> Vec<(i64, f64)> {
    response
        .rows()
        .into_iter()
        .filter_map(|row| {
            let value = row.values.first().copied().flatten()?;
            Some((row.timestamp.timestamp_millis(), value))
        })
        .collect()
}

/// Run the backfill query for `config`. Failures are logged and yield no
/// points.
pub async fn fetch_backfill(
    source: &dyn HistorySource,
    config: &DatasetConfig,
    now: DateTime<Utc>,
) -> Vec<(i64, f64)> {
    let query = history_query(config, now);
    match source.values(query).await {
        Ok(response) => {
            let points = rows_to_points(&response);
            debug!(uuid = %config.uuid, path = %config.path, rows = points.len(), "history backfill");
            points
        }
        Err(e) => {
            warn!(uuid = %config.uuid, path = %config.path, error = %e, "history backfill failed, continuing live-only");
            Vec::new()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::TimeScale;
    use serde_json::json;

    fn config(path: &str, sample_time: u64) -> DatasetConfig {
        DatasetConfig {
            sample_time,
            max_data_points: 60,
            ..DatasetConfig::new(path, "default", TimeScale::Minute(1))
        }
    }

    #[test]
    fn seeding_needs_whole_seconds() {
        assert!(!should_seed_history(&config("self.a", 200)));
        assert!(!should_seed_history(&config("self.a", 999)));
        assert!(should_seed_history(&config("self.a", 1000)));
        assert_eq!(history_resolution_secs(1000), 1);
        assert_eq!(history_resolution_secs(2500), 3);
        assert_eq!(history_resolution_secs(300_000), 300);
    }

    #[test]
    fn self_query_strips_prefix() {
        let now = Utc::now();
        let query = history_query(&config("self.environment.wind.speedTrue", 2000), now);
        assert_eq!(query.paths, vec!["environment.wind.speedTrue:average"]);
        assert_eq!(query.context, None);
        assert_eq!(query.resolution, Some(2));
        assert_eq!((now - query.from.unwrap()).num_seconds(), 120);
    }

    #[test]
    fn other_vessel_query_carries_context() {
        let config = config(
            "vessels.urn:mrn:imo:mmsi:111.navigation.courseOverGroundTrue",
            1000,
        )
        .with_domain(ValueDomain::Direction);
        let query = history_query(&config, Utc::now());
        assert_eq!(query.context.as_deref(), Some("vessels.urn:mrn:imo:mmsi:111"));
        assert_eq!(query.paths, vec!["navigation.courseOverGroundTrue:last"]);
    }

    #[test]
    fn null_cells_are_skipped() {
        let response: HistoryResponse = serde_json::from_value(json!({
            "values": [{ "path": "a", "method": "average" }],
            "data": [
                ["2025-01-01T00:00:00Z", 1.5],
                ["2025-01-01T00:00:01Z", null],
                ["2025-01-01T00:00:02Z", 2.5]
            ]
        }))
        .unwrap();
        let points = rows_to_points(&response);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].0 - points[0].0, 2000);
    }
}
