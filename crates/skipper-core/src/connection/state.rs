// ── Connection state machine ──
//
// Single authority for connection lifecycle, retry bookkeeping and status
// notification. No network I/O happens here: discovery and streaming report
// outcomes through the `on_*` methods, and retries are handed back to them
// through registered callbacks. A retry timer never changes state itself;
// only the outcome of the attempt it triggers does.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;

/// Callback invoked when a scheduled retry fires.
pub type RetryCallback = Arc<dyn Fn() + Send + Sync>;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection lifecycle state. Exactly one is active at a time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::IntoStaticStr,
)]
pub enum ConnectionState {
    Disconnected,
    #[strum(serialize = "HTTPDiscovering")]
    HttpDiscovering,
    #[strum(serialize = "HTTPConnected")]
    HttpConnected,
    #[strum(serialize = "HTTPError")]
    HttpError,
    #[strum(serialize = "HTTPRetrying")]
    HttpRetrying,
    WebSocketConnecting,
    Connected,
    WebSocketError,
    WebSocketRetrying,
    PermanentFailure,
}

impl ConnectionState {
    /// Numeric code understood by older notification consumers:
    /// 0 stopped, 1 connecting, 2 connected, 3 error/retrying, 5 permanent
    /// failure. Code 4 (resetting) only appears on stream status.
    pub fn legacy_code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::HttpDiscovering | Self::WebSocketConnecting => 1,
            Self::HttpConnected | Self::Connected => 2,
            Self::HttpError | Self::HttpRetrying | Self::WebSocketError | Self::WebSocketRetrying => {
                3
            }
            Self::PermanentFailure => 5,
        }
    }

    /// HTTP-level connectivity is established.
    pub fn is_http_connected(self) -> bool {
        matches!(
            self,
            Self::HttpConnected | Self::WebSocketConnecting | Self::Connected | Self::WebSocketRetrying
        )
    }

    fn is_websocket_phase(self) -> bool {
        matches!(
            self,
            Self::WebSocketConnecting | Self::Connected | Self::WebSocketError | Self::WebSocketRetrying
        )
    }
}

// ── ConnectionStatus ─────────────────────────────────────────────────

/// How loudly a status should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Timestamped snapshot emitted on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub legacy_code: u8,
    pub message: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionStatus {
    fn new(state: ConnectionState, message: String, retry_count: u32, max_retries: u32) -> Self {
        Self {
            state,
            legacy_code: state.legacy_code(),
            message,
            retry_count,
            max_retries,
            timestamp: Utc::now(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self.state {
            ConnectionState::Connected => Severity::Success,
            ConnectionState::Disconnected
            | ConnectionState::HttpDiscovering
            | ConnectionState::HttpConnected
            | ConnectionState::WebSocketConnecting => Severity::Info,
            ConnectionState::HttpRetrying | ConnectionState::WebSocketRetrying => {
                Severity::Warning
            }
            ConnectionState::HttpError
            | ConnectionState::WebSocketError
            | ConnectionState::PermanentFailure => Severity::Error,
        }
    }

    /// How long a notification for this status should stay visible.
    /// `None` means until dismissed.
    pub fn notification_duration(&self) -> Option<Duration> {
        match (self.state, self.severity()) {
            (ConnectionState::PermanentFailure, _) => None,
            (_, Severity::Success) => Some(Duration::from_secs(3)),
            (_, Severity::Info) => Some(Duration::from_secs(5)),
            (_, Severity::Warning | Severity::Error) => Some(Duration::from_secs(10)),
        }
    }
}

// ── ConnectionStateMachine ───────────────────────────────────────────

/// The connection state machine. Cheaply cloneable; clones share state.
///
/// Timer scheduling uses `tokio::spawn`, so the trigger methods must be
/// called from within a runtime.
#[derive(Clone)]
pub struct ConnectionStateMachine {
    shared: Arc<Shared>,
}

struct Shared {
    policy: RetryPolicy,
    status: watch::Sender<ConnectionStatus>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    http_retries: u32,
    ws_retries: u32,
    initialization_mode: bool,
    http_retry: Option<RetryCallback>,
    ws_retry: Option<RetryCallback>,
    retry_timer: Option<JoinHandle<()>>,
    notify_timer: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_timers(&mut self) {
        if let Some(handle) = self.retry_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.notify_timer.take() {
            handle.abort();
        }
    }
}

impl ConnectionStateMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        let initial = ConnectionStatus::new(
            ConnectionState::Disconnected,
            "Not connected".into(),
            0,
            policy.max_http_retries,
        );
        let (status, _) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                policy,
                status,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    http_retries: 0,
                    ws_retries: 0,
                    initialization_mode: false,
                    http_retry: None,
                    ws_retry: None,
                    retry_timer: None,
                    notify_timer: None,
                }),
            }),
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Subscribe to status snapshots. New receivers see the latest status.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn http_retry_count(&self) -> u32 {
        self.lock().http_retries
    }

    pub fn ws_retry_count(&self) -> u32 {
        self.lock().ws_retries
    }

    pub fn is_http_connected(&self) -> bool {
        self.state().is_http_connected()
    }

    pub fn is_fully_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether a retry attempt is scheduled and has not fired yet.
    pub fn has_pending_retry(&self) -> bool {
        self.lock()
            .retry_timer
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Total time the discovery backoff ladder can take, plus `grace_ms`.
    pub fn http_retry_window_ms(&self, grace_ms: Option<u64>) -> u64 {
        let window = self
            .shared
            .policy
            .http_retry_window(Duration::from_millis(grace_ms.unwrap_or(0)));
        u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    // ── Configuration ────────────────────────────────────────────────

    /// Hook invoked when a discovery retry is due.
    pub fn set_http_retry_callback(&self, callback: RetryCallback) {
        self.lock().http_retry = Some(callback);
    }

    /// Hook invoked when a streaming retry is due.
    pub fn set_ws_retry_callback(&self, callback: RetryCallback) {
        self.lock().ws_retry = Some(callback);
    }

    /// While set, discovery success stops at `HTTPConnected` instead of
    /// advancing to streaming.
    pub fn set_initialization_mode(&self, enabled: bool) {
        self.lock().initialization_mode = enabled;
    }

    // ── Discovery triggers ───────────────────────────────────────────

    pub fn start_discovery(&self, reason: &str) {
        let mut inner = self.lock();
        if let Some(handle) = inner.retry_timer.take() {
            handle.abort();
        }
        inner.http_retries = 0;
        info!(reason, "starting discovery");
        self.transition(&mut inner, ConnectionState::HttpDiscovering, format!("Connecting: {reason}"));
    }

    pub fn on_discovery_success(&self) {
        let advance = {
            let mut inner = self.lock();
            match inner.state {
                ConnectionState::Disconnected => {
                    debug!("discovery success after shutdown, ignoring");
                    return;
                }
                ConnectionState::PermanentFailure => {
                    debug!("discovery success in permanent failure, ignoring");
                    return;
                }
                _ => {}
            }
            inner.http_retries = 0;
            self.transition(&mut inner, ConnectionState::HttpConnected, "Server discovered".into());
            !inner.initialization_mode
        };
        if advance {
            self.start_streaming();
        }
    }

    pub fn on_discovery_error(&self, message: &str) {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Disconnected => {
                debug!(message, "discovery error after shutdown, ignoring");
                return;
            }
            ConnectionState::PermanentFailure => {
                debug!(message, "discovery error in permanent failure, ignoring");
                return;
            }
            _ => {}
        }

        let max = self.shared.policy.max_http_retries;
        if inner.http_retries >= max {
            if let Some(handle) = inner.retry_timer.take() {
                handle.abort();
            }
            warn!(message, retries = inner.http_retries, "discovery retries exhausted");
            self.transition(
                &mut inner,
                ConnectionState::PermanentFailure,
                format!("Connection failed after {max} attempts: {message}"),
            );
            return;
        }

        inner.http_retries += 1;
        let attempt = inner.http_retries;
        let Some(callback) = inner.http_retry.clone() else {
            warn!(message, "discovery failed, no retry hook registered");
            self.transition(&mut inner, ConnectionState::HttpError, message.to_owned());
            return;
        };

        let delay = self.shared.policy.http_retry_delay(attempt);
        warn!(
            message,
            attempt,
            max,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "discovery failed, scheduling retry"
        );
        self.transition(
            &mut inner,
            ConnectionState::HttpRetrying,
            format!("Retrying ({attempt}/{max}): {message}"),
        );
        Self::schedule(&mut inner, delay, callback);
    }

    // ── Streaming triggers ───────────────────────────────────────────

    pub fn start_streaming(&self) {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::HttpConnected
            | ConnectionState::WebSocketRetrying
            | ConnectionState::WebSocketConnecting
            | ConnectionState::Connected => {
                inner.ws_retries = 0;
                self.transition(
                    &mut inner,
                    ConnectionState::WebSocketConnecting,
                    "Opening data stream".into(),
                );
            }
            ConnectionState::HttpDiscovering => {}
            other => debug!(state = %other, "start_streaming ignored"),
        }
    }

    pub fn on_streaming_connected(&self) {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Disconnected | ConnectionState::PermanentFailure => {
                debug!(state = %inner.state, "stream opened outside a connection, ignoring");
                return;
            }
            _ => {}
        }
        inner.ws_retries = 0;
        inner.state = ConnectionState::Connected;
        info!("data stream connected");

        let debounce = self.shared.policy.connected_debounce;
        if debounce.is_zero() {
            self.emit(&inner, "Connected".into());
            return;
        }

        if let Some(handle) = inner.notify_timer.take() {
            handle.abort();
        }
        let shared = Arc::clone(&self.shared);
        inner.notify_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let machine = ConnectionStateMachine { shared };
            let inner = machine.lock();
            if inner.state == ConnectionState::Connected {
                machine.emit(&inner, "Connected".into());
            }
        }));
    }

    pub fn on_streaming_error(&self, message: &str) {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            ConnectionState::Disconnected | ConnectionState::PermanentFailure => {
                debug!(message, state = %state, "stream error outside a connection, ignoring");
                return;
            }
            _ => {}
        }

        if !state.is_http_connected() {
            // HTTP-level connectivity is gone: rediscover from scratch.
            if let Some(handle) = inner.retry_timer.take() {
                handle.abort();
            }
            inner.http_retries = 0;
            warn!(message, state = %state, "stream failed without HTTP connectivity, restarting discovery");
            self.transition(
                &mut inner,
                ConnectionState::HttpDiscovering,
                format!("Reconnecting: {message}"),
            );
            if let Some(callback) = inner.http_retry.clone() {
                Self::schedule(&mut inner, Duration::ZERO, callback);
            }
            return;
        }

        inner.ws_retries = inner.ws_retries.saturating_add(1);
        let attempt = inner.ws_retries;
        let max = self.shared.policy.max_ws_retries;
        let Some(callback) = inner.ws_retry.clone() else {
            warn!(message, "stream failed, no retry hook registered");
            self.transition(&mut inner, ConnectionState::WebSocketError, message.to_owned());
            return;
        };

        let delay = self.shared.policy.ws_retry_delay();
        warn!(message, attempt, "stream failed, scheduling retry");
        self.transition(
            &mut inner,
            ConnectionState::WebSocketRetrying,
            format!("Data stream retrying ({}/{max}): {message}", attempt.min(max)),
        );
        Self::schedule(&mut inner, delay, callback);
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Cancel pending timers, reset counters, force `Disconnected`.
    /// Idempotent.
    pub fn shutdown(&self, reason: &str) {
        let mut inner = self.lock();
        inner.cancel_timers();
        inner.http_retries = 0;
        inner.ws_retries = 0;
        if inner.state != ConnectionState::Disconnected {
            info!(reason, "connection shut down");
        }
        self.transition(&mut inner, ConnectionState::Disconnected, format!("Disconnected: {reason}"));
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never leave `Inner` half-updated.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, state: ConnectionState, message: String) {
        if state != ConnectionState::Connected {
            if let Some(handle) = inner.notify_timer.take() {
                handle.abort();
            }
        }
        inner.state = state;
        self.emit(inner, message);
    }

    fn emit(&self, inner: &Inner, message: String) {
        let (retry_count, max_retries) = if inner.state.is_websocket_phase() {
            (inner.ws_retries, self.shared.policy.max_ws_retries)
        } else {
            (inner.http_retries, self.shared.policy.max_http_retries)
        };
        let status = ConnectionStatus::new(inner.state, message, retry_count, max_retries);
        debug!(state = %status.state, code = status.legacy_code, "connection status");
        self.shared.status.send_replace(status);
    }

    /// Schedule `callback` after `delay`. Replaces any pending retry.
    fn schedule(inner: &mut Inner, delay: Duration, callback: RetryCallback) {
        if let Some(handle) = inner.retry_timer.take() {
            handle.abort();
        }
        inner.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }));
    }
}
