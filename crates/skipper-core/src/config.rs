// ── Runtime connection configuration ──
//
// These types describe *how* to reach a Signal K server and how hard to
// try. They carry the bearer token and tuning knobs, but never touch disk.
// The CLI (or skipper-config) constructs a `ConnectionConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use skipper_api::transport::{TlsMode, TransportConfig};
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed boat servers).
    DangerAcceptInvalid,
}

/// Retry and debounce policy of the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Discovery backoff ladder. Attempt `n` waits `intervals[min(n-1, len-1)]`.
    /// The second entry doubles as the streaming retry interval.
    pub http_retry_intervals: Vec<Duration>,
    /// Discovery failures tolerated before `PermanentFailure`.
    pub max_http_retries: u32,
    /// Denominator shown for streaming retries. Streaming retries never stop.
    pub max_ws_retries: u32,
    /// Delay before a `Connected` status is emitted. Zero emits immediately.
    pub connected_debounce: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            http_retry_intervals: vec![
                Duration::from_millis(2000),
                Duration::from_millis(3000),
                Duration::from_millis(5000),
            ],
            max_http_retries: 3,
            max_ws_retries: 5,
            connected_debounce: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Delay before discovery retry number `attempt` (1-based).
    pub fn http_retry_delay(&self, attempt: u32) -> Duration {
        let idx = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        let last = self.http_retry_intervals.len().saturating_sub(1);
        self.http_retry_intervals
            .get(idx.min(last))
            .copied()
            .unwrap_or(Duration::from_millis(2000))
    }

    /// Fixed delay before a streaming retry.
    pub fn ws_retry_delay(&self) -> Duration {
        self.http_retry_intervals
            .get(1)
            .or_else(|| self.http_retry_intervals.last())
            .copied()
            .unwrap_or(Duration::from_millis(3000))
    }

    /// Sum of the discovery backoff ladder plus `grace`.
    pub fn http_retry_window(&self, grace: Duration) -> Duration {
        self.http_retry_intervals.iter().sum::<Duration>() + grace
    }
}

/// Configuration for one Signal K server connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base URL the user entered (e.g. `http://boat.local:3000`).
    pub url: Url,
    /// Bearer token, appended to the stream URL and sent on HTTP requests.
    pub token: Option<SecretString>,
    /// Rewrite advertised service URLs onto `url`'s scheme/host/port.
    pub proxy_enabled: bool,
    /// Carried through to the endpoint status for consumers.
    pub subscribe_all: bool,
    pub tls: TlsVerification,
    /// Timeout of the discovery request made while connecting.
    pub discovery_timeout: Duration,
    /// Timeout of the pre-flight URL check.
    pub validation_timeout: Duration,
    /// Settle delay between closing and reopening the stream.
    pub reopen_delay: Duration,
    /// Initial interval of the stream's own reconnect loop.
    pub ws_reconnect_interval: Duration,
    /// Wait before the single retry of an outbound publish.
    pub publish_retry_delay: Duration,
    /// History API root. Derived from the discovered HTTP origin when unset.
    pub history_url: Option<Url>,
    pub retry: RetryPolicy,
}

impl ConnectionConfig {
    /// Defaults for everything but the server URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            token: None,
            proxy_enabled: false,
            subscribe_all: false,
            tls: TlsVerification::default(),
            discovery_timeout: Duration::from_secs(10),
            validation_timeout: Duration::from_secs(5),
            reopen_delay: Duration::from_millis(250),
            ws_reconnect_interval: Duration::from_millis(5000),
            publish_retry_delay: Duration::from_secs(1),
            history_url: None,
            retry: RetryPolicy::default(),
        }
    }

    /// HTTP transport settings derived from this config.
    pub fn transport(&self) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.discovery_timeout,
            token: self.token.clone(),
        }
    }
}
