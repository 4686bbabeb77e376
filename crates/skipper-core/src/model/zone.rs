// ── Alarm zones ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a path's current value. Ordered `Normal < Warning < Alarm`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ZoneState {
    #[default]
    Normal,
    Warning,
    Alarm,
}

/// A threshold rule. Missing bounds are open (±∞).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Fully qualified path (`self.environment.depth.belowKeel`).
    pub path: String,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
    /// Unit the bounds are expressed in. `None` compares the raw value.
    #[serde(default)]
    pub unit: Option<String>,
    pub state: ZoneState,
}

impl Zone {
    /// Whether `value` (already converted to this zone's unit) is in range.
    /// Both bounds are inclusive.
    pub fn contains(&self, value: f64) -> bool {
        self.lower.is_none_or(|lower| value >= lower) && self.upper.is_none_or(|upper| value <= upper)
    }
}

/// Emitted when a path's zone state changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneNotification {
    pub path: String,
    pub previous: ZoneState,
    pub state: ZoneState,
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
}
