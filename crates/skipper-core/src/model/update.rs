// ── Stream events and connection snapshots ──
//
// Typed events the streaming service derives from inbound frames, plus the
// endpoint and stream status snapshots published to observers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::path::Context;

/// One value for one path from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPointUpdate {
    pub context: Context,
    /// Path relative to the context (`navigation.speedOverGround`).
    pub path: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

/// Metadata for one path.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaUpdate {
    pub context: Context,
    pub path: String,
    pub meta: Value,
}

/// A value under the `notifications.` namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationUpdate {
    pub context: Context,
    /// Full path including the `notifications.` prefix.
    pub path: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

impl NotificationUpdate {
    /// `state` of the notification value (`alarm`, `warn`, `normal`, ...).
    pub fn state(&self) -> Option<&str> {
        self.value.get("state").and_then(Value::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.value.get("message").and_then(Value::as_str)
    }
}

/// Vessel and server identity from the hello frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelfIdentity {
    /// e.g. `vessels.urn:mrn:imo:mmsi:230000000`.
    pub self_id: Option<String>,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub roles: Vec<String>,
}

/// Outcome of the latest discovery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    /// Legacy operation code (2 connected, 3 error).
    pub operation: u8,
    pub message: String,
    pub server_description: Option<String>,
    pub http_service_url: Option<Url>,
    pub ws_service_url: Option<Url>,
    pub subscribe_all: bool,
    /// History API root derived from the HTTP service origin.
    pub history_url: Option<Url>,
}

impl EndpointStatus {
    pub fn is_connected(&self) -> bool {
        self.operation == 2 && self.ws_service_url.is_some()
    }
}

/// Status of the streaming channel, in legacy operation codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    /// 0 stopped, 1 connecting, 2 connected, 3 error, 4 resetting.
    pub operation: u8,
    pub message: String,
}

impl StreamStatus {
    pub(crate) fn new(operation: u8, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn stopped() -> Self {
        Self::new(0, "Stopped")
    }
}
