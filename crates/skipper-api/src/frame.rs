// Inbound WebSocket frame shapes
//
// Signal K multiplexes several message kinds over one stream. Frames are
// classified by the keys they carry, in order of expected frequency.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A classified inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// `{ context?, updates: [...] }` -- data and metadata deltas.
    Delta(DeltaFrame),
    /// `{ requestId, ... }` -- reply to a request we published.
    Response(ResponseFrame),
    /// `{ errorMessage }` -- server-side error notice.
    ServerError { message: String },
    /// `{ self, name, version, roles }` -- hello / identity frame.
    Hello(HelloFrame),
    /// Anything else. Logged and dropped by consumers.
    Unknown(Value),
}

impl InboundFrame {
    /// Classify a decoded JSON frame.
    ///
    /// Checks `updates` first (highest frequency), then `requestId`,
    /// `errorMessage`, and `self`.
    pub fn classify(value: Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::Unknown(value);
        };

        if obj.contains_key("updates") {
            return match serde_json::from_value::<DeltaFrame>(value.clone()) {
                Ok(delta) => Self::Delta(delta),
                Err(_) => Self::Unknown(value),
            };
        }
        if obj.contains_key("requestId") {
            return match serde_json::from_value::<ResponseFrame>(value.clone()) {
                Ok(resp) => Self::Response(resp),
                Err(_) => Self::Unknown(value),
            };
        }
        if let Some(msg) = obj.get("errorMessage") {
            let message = msg
                .as_str()
                .map_or_else(|| msg.to_string(), String::from);
            return Self::ServerError { message };
        }
        if obj.contains_key("self") {
            return match serde_json::from_value::<HelloFrame>(value.clone()) {
                Ok(hello) => Self::Hello(hello),
                Err(_) => Self::Unknown(value),
            };
        }
        Self::Unknown(value)
    }

    /// Parse a text frame. Invalid JSON yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<Value>(text).ok().map(Self::classify)
    }

    /// Short name of the frame kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delta(_) => "delta",
            Self::Response(_) => "response",
            Self::ServerError { .. } => "error",
            Self::Hello(_) => "hello",
            Self::Unknown(_) => "unknown",
        }
    }
}

// ── Delta ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaFrame {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub updates: Vec<Update>,
}

/// One entry of a delta's `updates` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Update {
    #[serde(rename = "$source", default)]
    pub source_ref: Option<String>,
    /// Legacy structured source (`{ label, type, src, talker, ... }`).
    #[serde(default)]
    pub source: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub values: Vec<ValueEntry>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub meta: Vec<MetaEntry>,
}

impl Update {
    /// The source label for this update: `$source` when present, otherwise
    /// `label[.src|.talker]` from the structured source.
    pub fn source_label(&self) -> Option<String> {
        if let Some(ref s) = self.source_ref {
            return Some(s.clone());
        }
        let source = self.source.as_ref()?;
        let label = source.get("label")?.as_str()?;
        let suffix = source
            .get("src")
            .or_else(|| source.get("talker"))
            .and_then(Value::as_str);
        Some(match suffix {
            Some(s) => format!("{label}.{s}"),
            None => label.to_owned(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueEntry {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEntry {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

/// Decode an array entry by entry, skipping entries that don't fit `T`.
/// A missing or `null` array is empty; a non-array is still an error.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed delta entry");
                None
            }
        })
        .collect())
}

// ── Hello ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloFrame {
    /// Vessel self identity, e.g. `vessels.urn:mrn:imo:mmsi:123456789`.
    #[serde(rename = "self", default)]
    pub self_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ── Request/response ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    pub request_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    /// Everything else the server sent (`login`, `accessRequest`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn updates_win_over_other_keys() {
        let frame = InboundFrame::classify(json!({
            "context": "vessels.self",
            "requestId": "abc",
            "updates": [{
                "$source": "nmea0183.GP",
                "timestamp": "2025-01-01T00:00:00Z",
                "values": [{ "path": "navigation.speedOverGround", "value": 3.2 }]
            }]
        }));
        let InboundFrame::Delta(delta) = frame else {
            panic!("expected delta, got {}", frame.kind());
        };
        assert_eq!(delta.context.as_deref(), Some("vessels.self"));
        assert_eq!(delta.updates[0].values[0].path, "navigation.speedOverGround");
    }

    #[test]
    fn classifies_response_error_and_hello() {
        let resp = InboundFrame::classify(json!({
            "requestId": "r-1", "state": "COMPLETED", "statusCode": 200
        }));
        assert!(matches!(resp, InboundFrame::Response(ref r) if r.status_code == Some(200)));

        let err = InboundFrame::classify(json!({ "errorMessage": "bad subscribe" }));
        assert!(matches!(err, InboundFrame::ServerError { ref message } if message == "bad subscribe"));

        let hello = InboundFrame::classify(json!({
            "self": "vessels.urn:mrn:imo:mmsi:230000000",
            "name": "signalk-server",
            "version": "2.8.0",
            "roles": ["master", "main"]
        }));
        let InboundFrame::Hello(hello) = hello else {
            panic!("expected hello");
        };
        assert_eq!(hello.roles.len(), 2);
        assert_eq!(hello.self_id.as_deref(), Some("vessels.urn:mrn:imo:mmsi:230000000"));
    }

    #[test]
    fn unknown_shapes_and_bad_json() {
        assert!(matches!(
            InboundFrame::classify(json!({ "foo": 1 })),
            InboundFrame::Unknown(_)
        ));
        assert!(matches!(
            InboundFrame::classify(json!({ "updates": "not-an-array" })),
            InboundFrame::Unknown(_)
        ));
        assert!(InboundFrame::parse("{not json").is_none());
    }

    #[test]
    fn malformed_entries_do_not_drop_the_frame() {
        let frame = InboundFrame::classify(json!({
            "updates": [
                42,
                { "timestamp": 17, "values": [] },
                {
                    "$source": "n2k.115",
                    "values": [
                        { "path": 7, "value": 1.0 },
                        { "path": "environment.depth.belowTransducer", "value": 4.2 }
                    ],
                    "meta": null
                }
            ]
        }));
        let InboundFrame::Delta(delta) = frame else {
            panic!("expected delta, got {}", frame.kind());
        };
        assert_eq!(delta.updates.len(), 1);
        let update = &delta.updates[0];
        assert_eq!(update.source_ref.as_deref(), Some("n2k.115"));
        assert_eq!(update.values.len(), 1);
        assert_eq!(update.values[0].path, "environment.depth.belowTransducer");
        assert!(update.meta.is_empty());
    }

    #[test]
    fn source_label_falls_back_to_structured_source() {
        let update: Update = serde_json::from_value(json!({
            "source": { "label": "n2k", "src": "115", "type": "NMEA2000" },
            "values": []
        }))
        .unwrap();
        assert_eq!(update.source_label().as_deref(), Some("n2k.115"));

        let update: Update = serde_json::from_value(json!({ "$source": "defaults" })).unwrap();
        assert_eq!(update.source_label().as_deref(), Some("defaults"));
    }
}
