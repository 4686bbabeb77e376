// ── Dataset (time-series) configuration and samples ──

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::path::DEFAULT_SOURCE;

const DEFAULT_PERIOD_FACTOR: f64 = 0.25;

/// How running statistics treat the values of a series.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueDomain {
    /// Linear mean/min/max.
    #[default]
    Scalar,
    /// Angles in radians; circular mean and arc-bounding extrema.
    Direction,
}

// ── TimeScale ────────────────────────────────────────────────────────

/// Chart time scale, resolving to a sample interval and buffer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeScale {
    /// 300 points, 200 ms apart.
    LastMinute,
    /// 300 points, 1 s apart.
    LastFiveMinutes,
    /// 300 points, 6 s apart.
    LastThirtyMinutes,
    /// `n` minutes at 1 s resolution.
    Minute(u32),
    /// `n` hours at 10 s resolution.
    Hour(u32),
    /// `n` days at 5 min resolution.
    Day(u32),
}

impl TimeScale {
    pub fn sample_time(self) -> Duration {
        Duration::from_millis(match self {
            Self::LastMinute => 200,
            Self::LastFiveMinutes | Self::Minute(_) => 1000,
            Self::LastThirtyMinutes => 6000,
            Self::Hour(_) => 10_000,
            Self::Day(_) => 300_000,
        })
    }

    pub fn max_data_points(self) -> usize {
        let per_unit = |n: u32, points: usize| usize::try_from(n.max(1)).unwrap_or(1) * points;
        match self {
            Self::LastMinute | Self::LastFiveMinutes | Self::LastThirtyMinutes => 300,
            Self::Minute(n) => per_unit(n, 60),
            Self::Hour(n) => per_unit(n, 360),
            Self::Day(n) => per_unit(n, 288),
        }
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastMinute => f.write_str("last-minute"),
            Self::LastFiveMinutes => f.write_str("last-5-minutes"),
            Self::LastThirtyMinutes => f.write_str("last-30-minutes"),
            Self::Minute(n) => write!(f, "{n}min"),
            Self::Hour(n) => write!(f, "{n}h"),
            Self::Day(n) => write!(f, "{n}d"),
        }
    }
}

impl FromStr for TimeScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "last-minute" => return Ok(Self::LastMinute),
            "last-5-minutes" => return Ok(Self::LastFiveMinutes),
            "last-30-minutes" => return Ok(Self::LastThirtyMinutes),
            _ => {}
        }

        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (count, unit) = s.split_at(split);
        let count: u32 = count
            .parse()
            .map_err(|_| format!("invalid time scale '{s}'"))?;
        match unit {
            "min" | "m" => Ok(Self::Minute(count)),
            "h" => Ok(Self::Hour(count)),
            "d" => Ok(Self::Day(count)),
            _ => Err(format!(
                "invalid time scale '{s}' (expected last-minute, last-5-minutes, last-30-minutes, <n>min, <n>h or <n>d)"
            )),
        }
    }
}

// ── DatasetConfig ────────────────────────────────────────────────────

fn default_source() -> String {
    DEFAULT_SOURCE.into()
}

fn default_period_factor() -> f64 {
    DEFAULT_PERIOD_FACTOR
}

fn default_editable() -> bool {
    true
}

/// Configuration of one time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetConfig {
    pub uuid: String,
    /// Fully qualified path (`self.environment.wind.speedTrue`).
    pub path: String,
    #[serde(default = "default_source")]
    pub source: String,
    /// Minimum time between samples, in milliseconds.
    pub sample_time: u64,
    pub max_data_points: usize,
    #[serde(default = "default_period_factor")]
    pub period_factor: f64,
    /// Explicit moving-average window; overrides `period_factor`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<usize>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value_domain: ValueDomain,
    /// User-managed series survive abandoned-series cleanup.
    #[serde(default = "default_editable")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_scale: Option<TimeScale>,
}

impl DatasetConfig {
    /// A new series with a fresh UUID, sized by `time_scale`.
    pub fn new(path: impl Into<String>, source: impl Into<String>, time_scale: TimeScale) -> Self {
        let path = path.into();
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            label: path.clone(),
            path,
            source: source.into(),
            sample_time: u64::try_from(time_scale.sample_time().as_millis()).unwrap_or(u64::MAX),
            max_data_points: time_scale.max_data_points(),
            period_factor: DEFAULT_PERIOD_FACTOR,
            period: None,
            value_domain: ValueDomain::Scalar,
            editable: true,
            time_scale: Some(time_scale),
        }
    }

    pub fn with_domain(mut self, domain: ValueDomain) -> Self {
        self.value_domain = domain;
        self
    }

    /// Moving-average window: explicit `period`, else
    /// `floor(max_data_points * period_factor)`, never below 1.
    #[allow(
        clippy::as_conversions,
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn period(&self) -> usize {
        self.period
            .unwrap_or_else(|| (self.max_data_points as f64 * self.period_factor).floor() as usize)
            .max(1)
    }

    pub fn sample_time(&self) -> Duration {
        Duration::from_millis(self.sample_time)
    }
}

// ── Samples ──────────────────────────────────────────────────────────

/// One buffered sample with its statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSample {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub value: f64,
    pub sma: Option<f64>,
    pub ema: Option<f64>,
    pub double_ema: Option<f64>,
    pub running_average: Option<f64>,
    pub running_minimum: Option<f64>,
    pub running_maximum: Option<f64>,
}

/// Item of a batch-then-live dataset subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetEvent {
    /// The whole buffer at subscription time (possibly empty). Always first.
    Batch(Vec<DatasetSample>),
    /// A sample pushed after the batch.
    Live(DatasetSample),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn period_from_factor() {
        let config = DatasetConfig::new("self.a", "default", TimeScale::LastFiveMinutes);
        assert_eq!(config.max_data_points, 300);
        assert_eq!(config.period(), 75);

        let explicit = DatasetConfig {
            period: Some(10),
            ..config
        };
        assert_eq!(explicit.period(), 10);
    }

    #[test]
    fn time_scale_presets() {
        assert_eq!(TimeScale::LastMinute.sample_time(), Duration::from_millis(200));
        assert_eq!(TimeScale::LastThirtyMinutes.sample_time(), Duration::from_secs(6));
        assert_eq!(TimeScale::Hour(2).max_data_points(), 720);
        assert_eq!(TimeScale::Minute(0).max_data_points(), 60);
    }

    #[test]
    fn time_scale_parse_round_trips_display() {
        for scale in [
            TimeScale::LastMinute,
            TimeScale::LastFiveMinutes,
            TimeScale::LastThirtyMinutes,
            TimeScale::Minute(10),
            TimeScale::Hour(6),
            TimeScale::Day(1),
        ] {
            assert_eq!(scale.to_string().parse::<TimeScale>().unwrap(), scale);
        }
        assert!("fortnight".parse::<TimeScale>().is_err());
        assert!("3y".parse::<TimeScale>().is_err());
    }

    #[test]
    fn config_defaults_when_deserializing() {
        let config: DatasetConfig = serde_json::from_value(serde_json::json!({
            "uuid": "a1",
            "path": "self.navigation.headingTrue",
            "sampleTime": 1000,
            "maxDataPoints": 120,
            "valueDomain": "direction"
        }))
        .unwrap();
        assert_eq!(config.source, "default");
        assert!((config.period_factor - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.period(), 30);
        assert!(config.editable);
        assert_eq!(config.value_domain, ValueDomain::Direction);
    }
}
