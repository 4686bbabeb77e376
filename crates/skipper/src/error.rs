//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use skipper_config::ConfigError;
use skipper_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(skipper::connection_failed),
        help(
            "Check that the server is running and reachable.\n\
             Try: skipper validate {url}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("{url} does not look like a Signal K server")]
    #[diagnostic(
        code(skipper::not_signalk),
        help("The discovery document at /signalk/ is missing or has no endpoints.v1 section.")
    )]
    NotSignalK { url: String },

    #[error("Access to {url} was refused (HTTP {status})")]
    #[diagnostic(
        code(skipper::forbidden),
        help(
            "The server requires a token.\n\
             Store one with: skipper config set-token\n\
             Or set SKIPPER_TOKEN."
        )
    )]
    Forbidden { url: String, status: u16 },

    #[error("Streaming failed: {reason}")]
    #[diagnostic(code(skipper::stream))]
    Stream { reason: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(skipper::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("API error: {message}")]
    #[diagnostic(code(skipper::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(skipper::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(skipper::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: skipper config init --server <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(skipper::no_config),
        help(
            "Pass --server <URL>, or create a profile with: skipper config init --server <URL>\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(skipper::config))]
    Config(#[from] ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(skipper::timeout),
        help("Increase the wait with --wait / --timeout or check the server.")
    )]
    Timeout { seconds: u64 },

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotSignalK { .. } | Self::Stream { .. } => {
                exit_code::CONNECTION
            }
            Self::Forbidden { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unreachable { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::ServerError { url, status } => CliError::ConnectionFailed {
                url,
                reason: format!("server error (HTTP {status})"),
            },
            CoreError::NotConnected => CliError::ConnectionFailed {
                url: "(not connected)".into(),
                reason: "no open connection".into(),
            },
            CoreError::NotSignalK { url } => CliError::NotSignalK { url },
            CoreError::Forbidden { url, status } => CliError::Forbidden { url, status },
            CoreError::Stream { reason } => CliError::Stream { reason },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::DatasetNotFound { uuid } => CliError::NotFound {
                resource_type: "series".into(),
                identifier: uuid,
            },
            CoreError::DatasetExists { uuid } => CliError::Validation {
                field: "series".into(),
                reason: format!("{uuid} is already registered"),
            },
            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::Config { message } => CliError::Validation {
                field: "server".into(),
                reason: message,
            },
            CoreError::Api { message, status } => CliError::ApiError {
                message: match status {
                    Some(status) => format!("{message} (HTTP {status})"),
                    None => message,
                },
            },
            CoreError::Internal(message) => CliError::ApiError { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_category() {
        let err = CliError::from(CoreError::Timeout { timeout_secs: 3 });
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);

        let err = CliError::from(CoreError::Forbidden {
            url: "http://boat/signalk/".into(),
            status: 401,
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);

        let err = CliError::from(CoreError::NotSignalK {
            url: "http://boat/signalk/".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }
}
