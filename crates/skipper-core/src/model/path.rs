// ── Path records ──
//
// One `PathRecord` per fully qualified path (`self.navigation.speedOverGround`,
// `vessels.urn:mrn:imo:mmsi:2300.navigation.position.latitude`). Created by
// the first value or metadata update that mentions the path.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::zone::ZoneState;

/// Source name meaning "whatever the server prioritises".
pub const DEFAULT_SOURCE: &str = "default";

const SELF_PREFIX: &str = "self";
const SELF_CONTEXT: &str = "vessels.self";

// ── Context ──────────────────────────────────────────────────────────

/// Which vessel (or other object) a delta describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Context {
    SelfVessel,
    Other(String),
}

impl Context {
    /// Resolve a delta's `context` against the known self identity.
    /// A missing context means the vessel itself.
    pub fn resolve(context: Option<&str>, self_id: Option<&str>) -> Self {
        match context {
            None | Some("" | SELF_CONTEXT) => Self::SelfVessel,
            Some(c) if Some(c) == self_id => Self::SelfVessel,
            Some(c) => Self::Other(c.to_owned()),
        }
    }

    /// `self.{path}` for the own vessel, `{context}.{path}` otherwise.
    pub fn qualify(&self, path: &str) -> String {
        match self {
            Self::SelfVessel => format!("{SELF_PREFIX}.{path}"),
            Self::Other(context) => format!("{context}.{path}"),
        }
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Self::SelfVessel)
    }
}

// ── ValueType ────────────────────────────────────────────────────────

/// Declared type of a path, inferred from its first non-null value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Number,
    String,
    Boolean,
    /// An RFC 3339 timestamp string.
    Date,
    Object,
    Array,
}

impl ValueType {
    /// Decode the type tag of a JSON value. `null` has no type.
    ///
    /// Strings that parse as RFC 3339 timestamps are re-typed as [`Date`](Self::Date).
    pub fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Object(_) => Some(Self::Object),
            Value::Array(_) => Some(Self::Array),
            Value::Number(_) => Some(Self::Number),
            Value::Bool(_) => Some(Self::Boolean),
            Value::String(s) => {
                if DateTime::parse_from_rfc3339(s).is_ok() {
                    Some(Self::Date)
                } else {
                    Some(Self::String)
                }
            }
        }
    }
}

// ── Metadata ─────────────────────────────────────────────────────────

/// Signal K metadata for a path (`units`, `displayName`, `zones`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathMeta(pub serde_json::Map<String, Value>);

impl PathMeta {
    /// Merge `value` into this metadata. Objects merge key by key; any
    /// other value is stored under `value`.
    pub fn merge(&mut self, value: &Value) {
        match value {
            Value::Object(obj) => {
                for (k, v) in obj {
                    self.0.insert(k.clone(), v.clone());
                }
            }
            other => {
                self.0.insert("value".into(), other.clone());
            }
        }
    }

    pub fn units(&self) -> Option<&str> {
        self.0.get("units").and_then(Value::as_str)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.0.get("displayName").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.0.get("description").and_then(Value::as_str)
    }
}

// ── Records ──────────────────────────────────────────────────────────

/// Last value seen from one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceValue {
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

/// Everything known about one path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathRecord {
    pub path: String,
    /// First source that reported a value. `None` for metadata-only records.
    pub default_source: Option<String>,
    /// Value read by `default`-source subscribers.
    pub current_value: Option<Value>,
    pub timestamp: Option<DateTime<Utc>>,
    /// One entry per source ever observed.
    pub sources: BTreeMap<String, SourceValue>,
    pub value_type: Option<ValueType>,
    pub state: ZoneState,
    pub meta: Option<PathMeta>,
    /// `true` when the path belongs to the own vessel.
    pub is_self: bool,
}

impl PathRecord {
    pub(crate) fn new(path: String, is_self: bool) -> Self {
        Self {
            path,
            default_source: None,
            current_value: None,
            timestamp: None,
            sources: BTreeMap::new(),
            value_type: None,
            state: ZoneState::Normal,
            meta: None,
            is_self,
        }
    }

    /// What a subscriber reading `source` sees. `None` when the source
    /// has never reported this path.
    pub fn update_for(&self, source: &str) -> Option<PathUpdate> {
        if source == DEFAULT_SOURCE {
            return Some(PathUpdate {
                value: self.current_value.clone(),
                state: self.state,
                timestamp: self.timestamp,
            });
        }
        self.sources.get(source).map(|sv| PathUpdate {
            value: Some(sv.value.clone()),
            state: self.state,
            timestamp: Some(sv.timestamp),
        })
    }
}

/// What a path subscriber sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PathUpdate {
    pub value: Option<Value>,
    pub state: ZoneState,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PathUpdate {
    /// The value as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infer_types() {
        assert_eq!(ValueType::infer(&json!(3.2)), Some(ValueType::Number));
        assert_eq!(ValueType::infer(&json!(true)), Some(ValueType::Boolean));
        assert_eq!(ValueType::infer(&json!("Skipper")), Some(ValueType::String));
        assert_eq!(
            ValueType::infer(&json!("2025-06-01T12:00:00.000Z")),
            Some(ValueType::Date)
        );
        assert_eq!(ValueType::infer(&json!({"a": 1})), Some(ValueType::Object));
        assert_eq!(ValueType::infer(&Value::Null), None);
    }

    #[test]
    fn context_resolution() {
        let me = Some("vessels.urn:mrn:imo:mmsi:230000000");
        assert!(Context::resolve(None, me).is_self());
        assert!(Context::resolve(Some("vessels.self"), None).is_self());
        assert!(Context::resolve(me, me).is_self());

        let other = Context::resolve(Some("vessels.urn:mrn:imo:mmsi:111"), me);
        assert_eq!(
            other.qualify("navigation.courseOverGroundTrue"),
            "vessels.urn:mrn:imo:mmsi:111.navigation.courseOverGroundTrue"
        );
        assert_eq!(
            Context::SelfVessel.qualify("navigation.speedOverGround"),
            "self.navigation.speedOverGround"
        );
    }

    #[test]
    fn meta_merge_keeps_existing_keys() {
        let mut meta = PathMeta::default();
        meta.merge(&json!({ "units": "m/s" }));
        meta.merge(&json!({ "displayName": "SOG" }));
        assert_eq!(meta.units(), Some("m/s"));
        assert_eq!(meta.display_name(), Some("SOG"));
    }

    #[test]
    fn update_for_reads_default_or_named_source() {
        let at = Utc::now();
        let mut record = PathRecord::new("self.navigation.speedOverGround".into(), true);
        record.current_value = Some(json!(3.2));
        record.timestamp = Some(at);
        record.state = ZoneState::Warning;
        record.sources.insert(
            "gps".into(),
            SourceValue {
                timestamp: at,
                value: json!(3.1),
            },
        );

        let default = record.update_for(DEFAULT_SOURCE).unwrap();
        assert_eq!(default.value, Some(json!(3.2)));
        assert_eq!(default.state, ZoneState::Warning);

        let gps = record.update_for("gps").unwrap();
        assert_eq!(gps.value, Some(json!(3.1)));
        assert_eq!(gps.timestamp, Some(at));

        assert!(record.update_for("ais").is_none());
    }
}
