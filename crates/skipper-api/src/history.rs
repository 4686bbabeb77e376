// Signal K history API client
//
// `GET {base}/history/values?paths=…&from=…&to=…&resolution=…` returns
// aggregated rows for one or more paths. Used for one-shot backfill of
// chart series; callers decide how to degrade on failure.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Query ────────────────────────────────────────────────────────────

/// Parameters of a history request. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    /// `path[:method]` entries, joined with commas on the wire.
    pub paths: Vec<String>,
    pub context: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// ISO-8601 duration (e.g. `PT300S`).
    pub duration: Option<String>,
    /// Bucket size in seconds.
    pub resolution: Option<u64>,
}

impl HistoryQuery {
    fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("paths", &self.paths.join(","));
        if let Some(ref context) = self.context {
            pairs.append_pair("context", context);
        }
        if let Some(from) = self.from {
            pairs.append_pair("from", &from.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        }
        if let Some(to) = self.to {
            pairs.append_pair("to", &to.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        }
        if let Some(ref duration) = self.duration {
            pairs.append_pair("duration", duration);
        }
        if let Some(resolution) = self.resolution {
            pairs.append_pair("resolution", &resolution.to_string());
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub range: Option<HistoryRange>,
    #[serde(default)]
    pub values: Vec<HistoryValueSpec>,
    /// Raw rows: `[timestamp, value0, value1, …]`.
    #[serde(default)]
    pub data: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRange {
    pub from: String,
    pub to: String,
}

/// Column descriptor: which path/aggregate each value column holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryValueSpec {
    pub path: String,
    #[serde(default)]
    pub method: Option<String>,
}

/// A decoded history row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<Option<f64>>,
}

impl HistoryResponse {
    /// Decode raw rows. Rows with an unreadable timestamp are skipped.
    pub fn rows(&self) -> Vec<HistoryRow> {
        self.data
            .iter()
            .filter_map(|row| {
                let (ts, rest) = row.split_first()?;
                let timestamp = parse_timestamp(ts)?;
                let values = rest.iter().map(serde_json::Value::as_f64).collect();
                Some(HistoryRow { timestamp, values })
            })
            .collect()
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Client for the history API rooted at `base_url`
/// (typically `{origin}/signalk/v2/api/`).
#[derive(Debug, Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HistoryClient {
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url: Self::normalize_base_url(base_url)?,
            timeout: transport.timeout,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
            timeout: Duration::from_secs(10),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    /// Fetch aggregated values.
    pub async fn values(&self, query: &HistoryQuery) -> Result<HistoryResponse, Error> {
        let mut url = self.base_url.join("history/values")?;
        query.apply(&mut url);
        debug!("GET {url}");

        let resp = self
            .http
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::from_send(e, &url, self.timeout.as_secs()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn query_serializes_only_set_fields() {
        let mut url = Url::parse("http://boat.local/signalk/v2/api/history/values").unwrap();
        HistoryQuery {
            paths: vec!["navigation.speedOverGround:average".into()],
            resolution: Some(3),
            ..HistoryQuery::default()
        }
        .apply(&mut url);

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("paths".into(), "navigation.speedOverGround:average".into()),
                ("resolution".into(), "3".into()),
            ]
        );
    }

    #[test]
    fn rows_decode_string_and_numeric_timestamps() {
        let resp: HistoryResponse = serde_json::from_value(serde_json::json!({
            "context": "vessels.self",
            "range": { "from": "2025-01-01T00:00:00Z", "to": "2025-01-01T00:01:00Z" },
            "values": [{ "path": "environment.wind.speedTrue", "method": "average" }],
            "data": [
                ["2025-01-01T00:00:00Z", 4.5],
                [1_735_689_601_000_i64, null],
                [true, 1.0]
            ]
        }))
        .unwrap();

        let rows = resp.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values, vec![Some(4.5)]);
        assert_eq!(rows[1].values, vec![None]);
        assert_eq!(rows[1].timestamp.timestamp_millis(), 1_735_689_601_000);
    }
}
