use thiserror::Error;

/// Top-level error type for the `skipper-api` crate.
///
/// Covers every failure mode of the wire layer: transport, discovery
/// classification, history queries, and the streaming channel.
/// `skipper-core` maps these into user-facing status messages.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error that did not fit a more specific category.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL does not use `http` or `https`.
    #[error("Unsupported URL scheme '{scheme}' (expected http or https)")]
    UnsupportedScheme { scheme: String },

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Connection refused, DNS failure, or no route to host.
    #[error("Server unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Discovery ───────────────────────────────────────────────────
    /// The server answered, but not like a Signal K server (404, or a
    /// discovery document without `endpoints.v1`).
    #[error("Not a Signal K server at {url}")]
    NotSignalK { url: String },

    /// The server refused access to the discovery document.
    #[error("Access to {url} is forbidden (HTTP {status})")]
    Forbidden { url: String, status: u16 },

    /// The server failed with a 5xx status.
    #[error("Server error (HTTP {status}) at {url}")]
    ServerError { url: String, status: u16 },

    /// Any other non-success HTTP status.
    #[error("Unexpected HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// No open channel to send on.
    #[error("WebSocket channel is not open")]
    ChannelNotOpen,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. }
            | Self::Unreachable { .. }
            | Self::ServerError { .. }
            | Self::WebSocketConnect(_)
            | Self::ChannelNotOpen => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::NotSignalK { .. } | Self::HttpStatus { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Classify a `reqwest` send error against the URL it targeted.
    pub(crate) fn from_send(err: reqwest::Error, url: &url::Url, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_secs }
        } else if err.is_connect() {
            Self::Unreachable {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            Self::Transport(err)
        }
    }

    /// Classify a non-success HTTP status.
    pub(crate) fn from_status(status: reqwest::StatusCode, url: &url::Url) -> Self {
        let url = url.to_string();
        let code = status.as_u16();
        match code {
            404 => Self::NotSignalK { url },
            401 | 403 => Self::Forbidden { url, status: code },
            500..=599 => Self::ServerError { url, status: code },
            _ => Self::HttpStatus { url, status: code },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url() -> url::Url {
        url::Url::parse("http://boat.local:3000/signalk/").unwrap()
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::NOT_FOUND, &url()),
            Error::NotSignalK { .. }
        ));
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::FORBIDDEN, &url()),
            Error::Forbidden { status: 403, .. }
        ));
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::UNAUTHORIZED, &url()),
            Error::Forbidden { status: 401, .. }
        ));
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::BAD_GATEWAY, &url()),
            Error::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::IM_A_TEAPOT, &url()),
            Error::HttpStatus { status: 418, .. }
        ));
    }

    #[test]
    fn transient_and_not_found_predicates() {
        assert!(Error::Timeout { timeout_secs: 5 }.is_transient());
        assert!(!Error::NotSignalK { url: String::new() }.is_transient());
        assert!(Error::NotSignalK { url: String::new() }.is_not_found());
        assert!(
            Error::HttpStatus {
                url: String::new(),
                status: 404
            }
            .is_not_found()
        );
    }
}
