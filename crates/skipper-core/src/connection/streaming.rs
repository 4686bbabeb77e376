// ── Streaming service ──
//
// Owns the lifecycle of the Signal K stream. A supervisor task closes and
// (after a settle delay) reopens the channel whenever a new endpoint is
// published, the token changes, or a reset/retry is requested. Inbound
// frames are demultiplexed into typed broadcast sub-streams; channel
// outcomes are reported to the connection state machine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::Value;
use skipper_api::frame::{InboundFrame, ResponseFrame};
use skipper_api::websocket::{ChannelEvent, ReconnectConfig, StreamingChannel, streaming_url};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::delta::{DeltaEvent, parse_delta};
use super::state::ConnectionStateMachine;
use crate::error::CoreError;
use crate::model::{
    DataPointUpdate, EndpointStatus, MetaUpdate, NotificationUpdate, SelfIdentity, StreamStatus,
};

const DATA_CHANNEL_SIZE: usize = 4096;
const EVENT_CHANNEL_SIZE: usize = 256;

/// Timing knobs of the streaming service.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Delay between closing the old channel and opening the new one.
    pub reopen_delay: Duration,
    /// Initial interval of the channel's own reconnect loop.
    pub reconnect_interval: Duration,
    /// Wait before retrying a publish on a closed channel.
    pub publish_retry_delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reopen_delay: Duration::from_millis(250),
            reconnect_interval: Duration::from_millis(5000),
            publish_retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Reset,
    Retry,
}

pub struct StreamingService {
    machine: ConnectionStateMachine,
    settings: StreamSettings,
    status: watch::Sender<StreamStatus>,
    self_identity: watch::Sender<Option<SelfIdentity>>,
    token: watch::Sender<Option<SecretString>>,
    data_tx: broadcast::Sender<Arc<DataPointUpdate>>,
    meta_tx: broadcast::Sender<Arc<MetaUpdate>>,
    notification_tx: broadcast::Sender<Arc<NotificationUpdate>>,
    response_tx: broadcast::Sender<Arc<ResponseFrame>>,
    control_tx: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    channel: Mutex<Option<StreamingChannel>>,
}

impl StreamingService {
    pub fn new(
        machine: ConnectionStateMachine,
        settings: StreamSettings,
        token: Option<SecretString>,
    ) -> Self {
        let (status, _) = watch::channel(StreamStatus::stopped());
        let (self_identity, _) = watch::channel(None);
        let (token, _) = watch::channel(token);
        let (data_tx, _) = broadcast::channel(DATA_CHANNEL_SIZE);
        let (meta_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (notification_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (response_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            machine,
            settings,
            status,
            self_identity,
            token,
            data_tx,
            meta_tx,
            notification_tx,
            response_tx,
            control_tx: Mutex::new(None),
            channel: Mutex::new(None),
        }
    }

    /// Register a stream reopen as the state machine's streaming retry hook.
    pub fn attach_retry(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.machine.set_ws_retry_callback(Arc::new(move || {
            if let Some(service) = weak.upgrade() {
                service.send_control(Control::Retry);
            }
        }));
    }

    /// Spawn the supervisor task following `endpoint`.
    pub fn start(
        self: &Arc<Self>,
        endpoint: watch::Receiver<Option<EndpointStatus>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *self.lock_control() = Some(control_tx);
        let service = Arc::clone(self);
        tokio::spawn(async move { service.supervise(endpoint, control_rx, cancel).await })
    }

    // ── Triggers ─────────────────────────────────────────────────────

    /// Replace the bearer token. An open channel is reopened with it.
    pub fn set_token(&self, token: Option<SecretString>) {
        self.token.send_replace(token);
    }

    /// Close and reopen the channel.
    pub fn reset(&self) {
        self.send_control(Control::Reset);
    }

    /// Send a JSON message. If the channel is not open, retries once after
    /// the publish retry delay.
    pub async fn publish(&self, message: &Value) -> Result<(), CoreError> {
        let text = message.to_string();
        if self.try_send(text.clone()).is_ok() {
            return Ok(());
        }
        debug!("channel not open, retrying publish");
        tokio::time::sleep(self.settings.publish_retry_delay).await;
        self.try_send(text).map_err(CoreError::from)
    }

    /// Publish `body` with a fresh `requestId` and return the id. Replies
    /// arrive on [`responses`](Self::responses).
    pub async fn publish_request(&self, mut body: Value) -> Result<String, CoreError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let Some(obj) = body.as_object_mut() else {
            return Err(CoreError::ValidationFailed {
                message: "request body must be a JSON object".into(),
            });
        };
        obj.insert("requestId".into(), Value::String(request_id.clone()));
        self.publish(&body).await?;
        Ok(request_id)
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    pub fn self_identity(&self) -> watch::Receiver<Option<SelfIdentity>> {
        self.self_identity.subscribe()
    }

    pub fn data_updates(&self) -> broadcast::Receiver<Arc<DataPointUpdate>> {
        self.data_tx.subscribe()
    }

    pub fn meta_updates(&self) -> broadcast::Receiver<Arc<MetaUpdate>> {
        self.meta_tx.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Arc<NotificationUpdate>> {
        self.notification_tx.subscribe()
    }

    pub fn responses(&self) -> broadcast::Receiver<Arc<ResponseFrame>> {
        self.response_tx.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.lock_channel().as_ref().is_some_and(StreamingChannel::is_open)
    }

    // ── Supervisor ───────────────────────────────────────────────────

    async fn supervise(
        self: Arc<Self>,
        mut endpoint_rx: watch::Receiver<Option<EndpointStatus>>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        cancel: CancellationToken,
    ) {
        let mut token_rx = self.token.subscribe();
        token_rx.mark_unchanged();

        let mut target = ws_target(&endpoint_rx.borrow_and_update());
        let mut events = match target {
            Some(ref url) => self.open(url, &cancel),
            None => None,
        };

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = endpoint_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    target = ws_target(&endpoint_rx.borrow_and_update());
                    events = self.reopen(target.as_ref(), "endpoint changed", &cancel).await;
                }
                changed = token_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    events = self.reopen(target.as_ref(), "token changed", &cancel).await;
                }
                Some(control) = control_rx.recv() => {
                    let reason = match control {
                        Control::Reset => "reset requested",
                        Control::Retry => "retrying stream",
                    };
                    events = self.reopen(target.as_ref(), reason, &cancel).await;
                }
                event = next_event(&mut events) => {
                    if !self.handle_event(event) {
                        events = None;
                    }
                }
            }
        }

        self.close("shutting down");
        self.status.send_replace(StreamStatus::stopped());
        debug!("stream supervisor exiting");
    }

    /// Close the current channel, wait the settle delay, open `target`.
    async fn reopen(
        &self,
        target: Option<&Url>,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Option<broadcast::Receiver<ChannelEvent>> {
        info!(reason, "reopening stream");
        if self.close(reason) {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(self.settings.reopen_delay) => {}
            }
        }
        match target {
            Some(url) => self.open(url, cancel),
            None => {
                self.status.send_replace(StreamStatus::stopped());
                None
            }
        }
    }

    fn open(
        &self,
        ws_url: &Url,
        cancel: &CancellationToken,
    ) -> Option<broadcast::Receiver<ChannelEvent>> {
        let token = self.token.borrow().clone();
        let url = streaming_url(ws_url, token.as_ref());
        let reconnect = ReconnectConfig {
            initial_delay: self.settings.reconnect_interval,
            ..ReconnectConfig::default()
        };

        self.status.send_replace(StreamStatus::new(1, "Connecting"));
        let mut channel = StreamingChannel::connect(url, reconnect, cancel.child_token());
        let events = channel.events();
        *self.lock_channel() = Some(channel);
        Some(events)
    }

    /// Shut the current channel down. Returns `false` when there was none.
    fn close(&self, reason: &str) -> bool {
        let Some(channel) = self.lock_channel().take() else {
            return false;
        };
        self.status.send_replace(StreamStatus::new(4, format!("Resetting: {reason}")));
        channel.shutdown();
        true
    }

    /// Returns `false` once the channel's event stream has ended.
    fn handle_event(&self, event: Result<ChannelEvent, RecvError>) -> bool {
        match event {
            Ok(ChannelEvent::Opened) => {
                self.status.send_replace(StreamStatus::new(2, "Connected"));
                self.machine.on_streaming_connected();
            }
            Ok(ChannelEvent::Frame(frame)) => self.dispatch(&frame),
            Ok(ref closed @ ChannelEvent::Closed { ref reason, .. }) => {
                if closed.is_clean_close() {
                    info!(reason = %reason, "stream closed");
                    self.status.send_replace(StreamStatus::stopped());
                } else {
                    let message = format!("Stream closed: {reason}");
                    self.status.send_replace(StreamStatus::new(3, message.clone()));
                    self.machine.on_streaming_error(&message);
                }
            }
            Ok(ChannelEvent::Failed(message)) => {
                self.status.send_replace(StreamStatus::new(3, message.clone()));
                self.machine.on_streaming_error(&message);
            }
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "stream events lagged"),
            Err(RecvError::Closed) => return false,
        }
        true
    }

    fn dispatch(&self, frame: &InboundFrame) {
        match frame {
            InboundFrame::Delta(delta) => {
                let self_id = self
                    .self_identity
                    .borrow()
                    .as_ref()
                    .and_then(|identity| identity.self_id.clone());
                for event in parse_delta(delta, self_id.as_deref()) {
                    // Send errors just mean nobody is listening right now.
                    match event {
                        DeltaEvent::Data(update) => {
                            let _ = self.data_tx.send(Arc::new(update));
                        }
                        DeltaEvent::Meta(update) => {
                            let _ = self.meta_tx.send(Arc::new(update));
                        }
                        DeltaEvent::Notification(update) => {
                            let _ = self.notification_tx.send(Arc::new(update));
                        }
                    }
                }
            }
            InboundFrame::Response(response) => {
                debug!(request_id = %response.request_id, state = ?response.state, "request response");
                let _ = self.response_tx.send(Arc::new(response.clone()));
            }
            InboundFrame::ServerError { message } => {
                warn!(message = %message, "server reported an error");
            }
            InboundFrame::Hello(hello) => {
                info!(
                    self_id = ?hello.self_id,
                    server = ?hello.name,
                    version = ?hello.version,
                    "server hello"
                );
                self.self_identity.send_replace(Some(SelfIdentity {
                    self_id: hello.self_id.clone(),
                    server_name: hello.name.clone(),
                    server_version: hello.version.clone(),
                    roles: hello.roles.clone(),
                }));
            }
            InboundFrame::Unknown(value) => {
                debug!(frame = %value, "dropping unknown frame");
            }
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn try_send(&self, text: String) -> Result<(), skipper_api::Error> {
        match self.lock_channel().as_ref() {
            Some(channel) => channel.send(text),
            None => Err(skipper_api::Error::ChannelNotOpen),
        }
    }

    fn send_control(&self, control: Control) {
        let sent = self
            .lock_control()
            .as_ref()
            .is_some_and(|tx| tx.send(control).is_ok());
        if !sent {
            debug!(?control, "stream supervisor not running");
        }
    }

    fn lock_channel(&self) -> MutexGuard<'_, Option<StreamingChannel>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_control(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Control>>> {
        self.control_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The streaming URL to connect to, if the endpoint status has one.
fn ws_target(endpoint: &Option<EndpointStatus>) -> Option<Url> {
    endpoint
        .as_ref()
        .filter(|status| status.is_connected())
        .and_then(|status| status.ws_service_url.clone())
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ChannelEvent>>,
) -> Result<ChannelEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::connection::ConnectionState;
    use serde_json::json;

    fn service() -> (Arc<StreamingService>, ConnectionStateMachine) {
        let machine = ConnectionStateMachine::new(RetryPolicy::default());
        let service = Arc::new(StreamingService::new(
            machine.clone(),
            StreamSettings::default(),
            None,
        ));
        (service, machine)
    }

    fn frame(value: Value) -> InboundFrame {
        InboundFrame::classify(value)
    }

    #[tokio::test]
    async fn hello_sets_identity_used_for_context() {
        let (service, _) = service();
        let mut data = service.data_updates();

        service.dispatch(&frame(json!({
            "self": "vessels.urn:mrn:imo:mmsi:230000000",
            "name": "signalk-server",
            "version": "2.8.0",
            "roles": ["master"]
        })));
        assert_eq!(
            service.self_identity().borrow().as_ref().unwrap().server_version.as_deref(),
            Some("2.8.0")
        );

        service.dispatch(&frame(json!({
            "context": "vessels.urn:mrn:imo:mmsi:230000000",
            "updates": [{ "$source": "n2k.1", "values": [
                { "path": "navigation.speedOverGround", "value": 3.2 }
            ]}]
        })));
        let update = data.try_recv().unwrap();
        assert!(update.context.is_self());
    }

    #[tokio::test]
    async fn notifications_and_responses_have_their_own_streams() {
        let (service, _) = service();
        let mut notifications = service.notifications();
        let mut responses = service.responses();
        let mut data = service.data_updates();

        service.dispatch(&frame(json!({
            "updates": [{ "$source": "alarms", "values": [
                { "path": "notifications.mob", "value": { "state": "emergency" } }
            ]}]
        })));
        service.dispatch(&frame(json!({ "requestId": "r1", "state": "COMPLETED", "statusCode": 200 })));
        service.dispatch(&frame(json!({ "errorMessage": "bad" })));
        service.dispatch(&frame(json!({ "mystery": true })));

        assert_eq!(notifications.try_recv().unwrap().path, "notifications.mob");
        assert_eq!(responses.try_recv().unwrap().request_id, "r1");
        assert!(data.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_events_drive_the_state_machine() {
        let (service, machine) = service();
        machine.start_discovery("test");
        machine.on_discovery_success();

        assert!(service.handle_event(Ok(ChannelEvent::Opened)));
        assert_eq!(machine.state(), ConnectionState::Connected);
        assert_eq!(service.status().borrow().operation, 2);

        service.handle_event(Ok(ChannelEvent::Failed("reset by peer".into())));
        assert_eq!(service.status().borrow().operation, 3);
        assert_eq!(machine.state(), ConnectionState::WebSocketError);

        assert!(!service.handle_event(Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn clean_close_is_not_an_error() {
        let (service, machine) = service();
        machine.start_discovery("test");
        machine.on_discovery_success();
        service.handle_event(Ok(ChannelEvent::Opened));

        service.handle_event(Ok(ChannelEvent::Closed {
            code: Some(1000),
            reason: "bye".into(),
        }));
        assert_eq!(*service.status().borrow(), StreamStatus::stopped());
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn closing_without_a_channel_is_a_no_op() {
        let (service, _) = service();
        assert!(!service.close("test"));
        assert_eq!(service.status().borrow().operation, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_retries_once_then_fails() {
        let (service, _) = service();
        let started = tokio::time::Instant::now();
        let result = service.publish(&json!({ "context": "vessels.self" })).await;
        assert!(matches!(result, Err(CoreError::NotConnected)));
        assert!(started.elapsed() >= Duration::from_secs(1));

        let result = service.publish_request(json!([1, 2])).await;
        assert!(matches!(result, Err(CoreError::ValidationFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_stops_on_cancel() {
        let (service, _) = service();
        let (_endpoint_tx, endpoint_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let handle = service.start(endpoint_rx, cancel.clone());

        service.reset();
        tokio::task::yield_now().await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(!service.is_open());
        assert_eq!(service.status().borrow().operation, 0);
    }
}
