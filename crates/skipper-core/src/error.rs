// ── Core error types ──
//
// User-facing errors from skipper-core. Consumers never see reqwest or
// tungstenite errors directly. The `From<skipper_api::Error>` impl maps
// wire-level failures into the categories shown to the user.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach server at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("{url} is not a Signal K server")]
    NotSignalK { url: String },

    #[error("Access to {url} was refused (HTTP {status}); a token may be required")]
    Forbidden { url: String, status: u16 },

    #[error("Server error (HTTP {status}) at {url}")]
    ServerError { url: String, status: u16 },

    #[error("Streaming channel failed: {reason}")]
    Stream { reason: String },

    #[error("Not connected to a Signal K server")]
    NotConnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Dataset not found: {uuid}")]
    DatasetNotFound { uuid: String },

    #[error("Dataset already registered: {uuid}")]
    DatasetExists { uuid: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<skipper_api::Error> for CoreError {
    fn from(err: skipper_api::Error) -> Self {
        match err {
            skipper_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::Unreachable {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            skipper_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            skipper_api::Error::UnsupportedScheme { scheme } => CoreError::Config {
                message: format!("URL must start with http:// or https:// (got {scheme}://)"),
            },
            skipper_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            skipper_api::Error::Unreachable { url, reason } => {
                CoreError::Unreachable { url, reason }
            }
            skipper_api::Error::Tls(msg) => CoreError::Unreachable {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            skipper_api::Error::NotSignalK { url } => CoreError::NotSignalK { url },
            skipper_api::Error::Forbidden { url, status } => CoreError::Forbidden { url, status },
            skipper_api::Error::ServerError { url, status } => {
                CoreError::ServerError { url, status }
            }
            skipper_api::Error::HttpStatus { url, status } => CoreError::Api {
                message: format!("unexpected response from {url}"),
                status: Some(status),
            },
            skipper_api::Error::WebSocketConnect(reason) => CoreError::Stream { reason },
            skipper_api::Error::WebSocketClosed { code, reason } => CoreError::Stream {
                reason: format!("closed (code {code}): {reason}"),
            },
            skipper_api::Error::ChannelNotOpen => CoreError::NotConnected,
            skipper_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_user_categories() {
        let err = CoreError::from(skipper_api::Error::NotSignalK {
            url: "http://x/signalk/".into(),
        });
        assert!(matches!(err, CoreError::NotSignalK { .. }));

        let err = CoreError::from(skipper_api::Error::Timeout { timeout_secs: 5 });
        assert_eq!(err.to_string(), "Connection timed out after 5s");

        let err = CoreError::from(skipper_api::Error::ChannelNotOpen);
        assert!(matches!(err, CoreError::NotConnected));
    }
}
