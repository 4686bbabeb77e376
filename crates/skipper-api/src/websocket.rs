//! Signal K streaming channel with auto-reconnect.
//!
//! Connects to a server's `signalk-ws` endpoint and streams classified
//! [`InboundFrame`]s through a [`tokio::sync::broadcast`] channel, together
//! with open/close/failure lifecycle events. Reconnection uses exponential
//! backoff + jitter underneath whatever retry policy the caller layers on top.
//!
//! # Example
//!
//! ```rust,ignore
//! use skipper_api::websocket::{ChannelEvent, ReconnectConfig, StreamingChannel, streaming_url};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let base = Url::parse("ws://boat.local:3000/signalk/v1/stream")?;
//! let mut channel = StreamingChannel::connect(
//!     streaming_url(&base, None),
//!     ReconnectConfig::default(),
//!     CancellationToken::new(),
//! );
//! let mut rx = channel.events();
//!
//! while let Ok(event) = rx.recv().await {
//!     if let ChannelEvent::Frame(frame) = event {
//!         println!("{}", frame.kind());
//!     }
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::frame::InboundFrame;

// ── Channel capacities ───────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

// ── Streaming URL ────────────────────────────────────────────────────

/// Build the streaming URL: subscribe to everything, include all
/// metadata, and append the bearer token when one is available.
pub fn streaming_url(ws_base: &Url, token: Option<&SecretString>) -> Url {
    let mut url = ws_base.clone();
    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("subscribe", "all");
        pairs.append_pair("sendMeta", "all");
        if let Some(token) = token {
            pairs.append_pair("token", token.expose_secret());
        }
    }
    url
}

// ── ChannelEvent ─────────────────────────────────────────────────────

/// Lifecycle and data events emitted by a [`StreamingChannel`].
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The WebSocket handshake completed.
    Opened,
    /// A classified inbound frame.
    Frame(Arc<InboundFrame>),
    /// The connection ended without a transport error. `code` is `None`
    /// when the stream ended without a close frame.
    Closed { code: Option<u16>, reason: String },
    /// The connection attempt or an open connection failed.
    Failed(String),
}

impl ChannelEvent {
    /// A close with a normal/going-away code, or a bare end of stream.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::Closed { code: None | Some(1000 | 1001), .. })
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 5s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_retries: None,
        }
    }
}

// ── StreamingChannel ─────────────────────────────────────────────────

/// Handle to a running streaming channel.
///
/// Dropping the handle does not stop the background task; call
/// [`shutdown`](Self::shutdown) or cancel the token passed to
/// [`connect`](Self::connect).
pub struct StreamingChannel {
    event_tx: broadcast::Sender<ChannelEvent>,
    first_rx: Option<broadcast::Receiver<ChannelEvent>>,
    outbound_tx: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl StreamingChannel {
    /// Spawn the connect/read/reconnect loop.
    ///
    /// Returns immediately; the first connection attempt happens on the
    /// spawned task. Take the receiver from [`events`](Self::events) to see
    /// every event from the very first `Opened` on.
    pub fn connect(url: Url, reconnect: ReconnectConfig, cancel: CancellationToken) -> Self {
        let (event_tx, first_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(false));

        let task_tx = event_tx.clone();
        let task_open = Arc::clone(&open);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(url, task_tx, outbound_rx, task_open, reconnect, task_cancel).await;
        });

        Self {
            event_tx,
            first_rx: Some(first_rx),
            outbound_tx,
            open,
            cancel,
        }
    }

    /// Get a receiver for channel events.
    ///
    /// The first call returns the receiver created with the channel, so no
    /// event is missed. Later calls subscribe from the current tail.
    pub fn events(&mut self) -> broadcast::Receiver<ChannelEvent> {
        self.first_rx
            .take()
            .unwrap_or_else(|| self.event_tx.subscribe())
    }

    /// Whether the socket is currently open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue a text frame for sending.
    pub fn send(&self, text: String) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::ChannelNotOpen);
        }
        self.outbound_tx
            .try_send(text)
            .map_err(|_| Error::ChannelNotOpen)
    }

    /// Signal the background task to close the socket and exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on drop, backoff → reconnect.
async fn ws_loop(
    url: Url,
    event_tx: broadcast::Sender<ChannelEvent>,
    mut outbound_rx: mpsc::Receiver<String>,
    open: Arc<AtomicBool>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&url, &event_tx, &mut outbound_rx, &open, &cancel) => result,
        };
        open.store(false, Ordering::Release);

        match result {
            // Clean disconnect (server close frame or stream ended).
            Ok(()) => {
                tracing::info!("streaming channel closed cleanly");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "streaming channel error");
                let _ = event_tx.send(ChannelEvent::Failed(e.to_string()));

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            "streaming reconnection limit reached, giving up"
                        );
                        break;
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        let delay = calculate_backoff(attempt, &reconnect);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    open.store(false, Ordering::Release);
    tracing::debug!("streaming loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and pump it until it drops.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<ChannelEvent>,
    outbound_rx: &mut mpsc::Receiver<String>,
    open: &AtomicBool,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %redact_token(url), "connecting streaming channel");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    open.store(true, Ordering::Release);
    let _ = event_tx.send(ChannelEvent::Opened);
    tracing::info!("streaming channel open");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                let _ = event_tx.send(ChannelEvent::Closed { code: None, reason: "shutdown".into() });
                return Ok(());
            }
            Some(text) = outbound_rx.recv() => {
                write
                    .send(tungstenite::Message::Text(text.into()))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("streaming ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((None, String::new()), |cf| {
                            (Some(u16::from(cf.code)), cf.reason.as_str().to_owned())
                        });
                        tracing::info!(?code, reason = %reason, "streaming close frame received");
                        if matches!(code.map(CloseCode::from), None | Some(CloseCode::Normal | CloseCode::Away)) {
                            let _ = event_tx.send(ChannelEvent::Closed { code, reason });
                            return Ok(());
                        }
                        return Err(Error::WebSocketClosed {
                            code: code.unwrap_or_default(),
                            reason,
                        });
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("streaming channel ended");
                        let _ = event_tx.send(ChannelEvent::Closed { code: None, reason: String::new() });
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse a text frame and broadcast it. Invalid JSON is logged and dropped.
fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<ChannelEvent>) {
    let Some(frame) = InboundFrame::parse(text) else {
        tracing::debug!(len = text.len(), "failed to parse streaming frame");
        return;
    };

    // Ignore send errors -- just means no active subscribers right now
    let _ = event_tx.send(ChannelEvent::Frame(Arc::new(frame)));
}

/// Strip the token from a URL before logging it.
fn redact_token(url: &Url) -> Url {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
#[allow(clippy::as_conversions, clippy::cast_possible_wrap)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(16) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn first_backoff_is_the_initial_interval() {
        let config = ReconnectConfig::default();
        assert_eq!(calculate_backoff(0, &config), Duration::from_secs(5));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d1 = calculate_backoff(1, &config);
        let d3 = calculate_backoff(3, &config);
        assert!(d3 > d1, "d3 ({d3:?}) should be greater than d1 ({d1:?})");

        let d40 = calculate_backoff(40, &config);
        assert!(d40 <= Duration::from_millis(12_500), "{d40:?} not capped");
    }

    #[test]
    fn streaming_url_adds_subscription_and_token() {
        let base = Url::parse("ws://boat.local:3000/signalk/v1/stream").unwrap();
        let plain = streaming_url(&base, None);
        assert_eq!(
            plain.as_str(),
            "ws://boat.local:3000/signalk/v1/stream?subscribe=all&sendMeta=all"
        );

        let token = SecretString::from("jwt.token".to_string());
        let with_token = streaming_url(&base, Some(&token));
        assert!(with_token.as_str().ends_with("&token=jwt.token"));
        assert!(redact_token(&with_token).as_str().ends_with("token=***"));
    }

    #[test]
    fn clean_close_classification() {
        assert!(ChannelEvent::Closed { code: None, reason: String::new() }.is_clean_close());
        assert!(ChannelEvent::Closed { code: Some(1000), reason: String::new() }.is_clean_close());
        assert!(!ChannelEvent::Closed { code: Some(1011), reason: String::new() }.is_clean_close());
        assert!(!ChannelEvent::Failed("boom".into()).is_clean_close());
    }

    #[test]
    fn parse_and_broadcast_text_frames() {
        let (tx, mut rx) = broadcast::channel(16);

        parse_and_broadcast(r#"{"updates":[{"values":[]}]}"#, &tx);
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, ChannelEvent::Frame(ref f) if f.kind() == "delta"));

        parse_and_broadcast("not json at all", &tx);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_fails_before_open() {
        let cancel = CancellationToken::new();
        let channel = StreamingChannel::connect(
            Url::parse("ws://127.0.0.1:9/stream").unwrap(),
            ReconnectConfig::default(),
            cancel.clone(),
        );
        assert!(matches!(channel.send("{}".into()), Err(Error::ChannelNotOpen)));
        channel.shutdown();
        assert!(cancel.is_cancelled());
    }
}
