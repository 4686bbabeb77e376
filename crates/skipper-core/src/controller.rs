// ── Controller ──
//
// One per process. Wires the connection state machine, discovery, the
// streaming channel, the path store and the dataset engine together, and
// owns the background tasks that feed them.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::Value;
use skipper_api::{DiscoveryClient, HistoryClient, ServerInfo};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ConnectionConfig;
use crate::connection::{
    ConnectionState, ConnectionStateMachine, ConnectionStatus, DiscoveryService, StreamSettings,
    StreamingService,
};
use crate::dataset::DatasetService;
use crate::error::CoreError;
use crate::model::{EndpointStatus, NotificationUpdate, SelfIdentity, StreamStatus, ZoneNotification};
use crate::store::PathStore;
use crate::stream::PathStream;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Construct once, then
/// [`connect()`](Self::connect); every stream and service is reachable
/// through the accessors.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: Mutex<ConnectionConfig>,
    machine: ConnectionStateMachine,
    discovery: Arc<DiscoveryService>,
    streaming: Arc<StreamingService>,
    store: Arc<PathStore>,
    datasets: Arc<DatasetService>,
    cancel: CancellationToken,
    /// Child token for the current connection, replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Build every service from `config`. Does NOT connect.
    pub fn new(config: ConnectionConfig) -> Result<Self, CoreError> {
        let transport = config.transport();
        let machine = ConnectionStateMachine::new(config.retry.clone());

        let discovery = Arc::new(DiscoveryService::new(
            DiscoveryClient::new(&transport)?,
            machine.clone(),
            config.discovery_timeout,
            config.validation_timeout,
        ));
        discovery.attach_retry();

        let streaming = Arc::new(StreamingService::new(
            machine.clone(),
            StreamSettings {
                reopen_delay: config.reopen_delay,
                reconnect_interval: config.ws_reconnect_interval,
                publish_retry_delay: config.publish_retry_delay,
            },
            config.token.clone(),
        ));
        streaming.attach_retry();

        let store = Arc::new(PathStore::new());
        let datasets = Arc::new(DatasetService::new(Arc::clone(&store)));
        if let Some(ref url) = config.history_url {
            let client = HistoryClient::new(url.as_str(), &transport)?;
            datasets.set_history_source(Some(Box::new(client)));
        }

        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config: Mutex::new(config),
                machine,
                discovery,
                streaming,
                store,
                datasets,
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start the background tasks and run discovery against the configured
    /// server. Discovery failures are retried by the state machine; watch
    /// [`connection_status()`](Self::connection_status) for the outcome.
    pub async fn connect(&self) -> Result<(), CoreError> {
        if !self.inner.task_handles.lock().await.is_empty() {
            debug!("already connected, restarting");
            self.disconnect().await;
        }

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let history_bridge = self.spawn_history_bridge(child.clone()).await;
        {
            let mut handles = self.inner.task_handles.lock().await;
            handles.push(
                self.inner
                    .streaming
                    .start(self.inner.discovery.endpoint(), child.clone()),
            );
            handles.push(self.spawn_store_bridge(child));
            handles.push(history_bridge);
        }

        let config = self.inner.config.lock().await.clone();
        info!(url = %config.url, "connecting");
        self.inner
            .discovery
            .initialize_connection(config.url.as_str(), config.proxy_enabled, config.subscribe_all)
            .await;
        Ok(())
    }

    /// Point the connection at a different server. The state machine is
    /// shut down first; path values from the old server are dropped.
    pub async fn reconfigure(
        &self,
        url: Url,
        proxy_enabled: bool,
        subscribe_all: bool,
    ) -> Result<(), CoreError> {
        {
            let mut config = self.inner.config.lock().await;
            config.url = url;
            config.proxy_enabled = proxy_enabled;
            config.subscribe_all = subscribe_all;
        }
        self.inner.machine.shutdown("reconfiguring");
        self.inner.store.clear();

        if self.inner.task_handles.lock().await.is_empty() {
            return self.connect().await;
        }
        let config = self.inner.config.lock().await.clone();
        info!(url = %config.url, "reconfigured");
        self.inner
            .discovery
            .initialize_connection(config.url.as_str(), config.proxy_enabled, config.subscribe_all)
            .await;
        Ok(())
    }

    /// Stop every background task and force `Disconnected`.
    pub async fn disconnect(&self) {
        self.inner.machine.shutdown("disconnect requested");

        // Cancel the child token (not the parent, so reconnect works).
        self.inner.cancel_child.lock().await.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("disconnected");
    }

    /// Wait until the stream is connected.
    ///
    /// Fails on `PermanentFailure` or when `timeout` elapses first.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut status = self.inner.machine.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            status.wait_for(|s| {
                matches!(
                    s.state,
                    ConnectionState::Connected | ConnectionState::PermanentFailure
                )
            }),
        )
        .await;

        let status = match reached {
            Err(_) => {
                return Err(CoreError::Timeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
            Ok(Err(_)) => return Err(CoreError::NotConnected),
            Ok(Ok(status)) => status.clone(),
        };
        if status.state == ConnectionState::Connected {
            return Ok(());
        }
        Err(CoreError::Unreachable {
            url: self.inner.config.lock().await.url.to_string(),
            reason: status.message,
        })
    }

    /// How long a caller should wait for a connection: the whole discovery
    /// backoff ladder plus `grace`.
    pub fn connect_window(&self, grace: Duration) -> Duration {
        self.inner.machine.policy().http_retry_window(grace)
    }

    /// Pre-flight check of a URL. Touches no shared state.
    pub async fn validate_url(&self, url: &str) -> Result<ServerInfo, CoreError> {
        self.inner.discovery.validate_url(url).await
    }

    /// Replace the bearer token used by the stream. An open stream reopens.
    pub async fn set_token(&self, token: Option<SecretString>) {
        self.inner.config.lock().await.token.clone_from(&token);
        self.inner.streaming.set_token(token);
    }

    /// Close and reopen the stream.
    pub fn reset_stream(&self) {
        self.inner.streaming.reset();
    }

    /// Send a JSON message over the stream.
    pub async fn publish(&self, message: &Value) -> Result<(), CoreError> {
        self.inner.streaming.publish(message).await
    }

    // ── State observation ────────────────────────────────────────────

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.machine.subscribe()
    }

    pub fn state_machine(&self) -> &ConnectionStateMachine {
        &self.inner.machine
    }

    pub fn endpoint(&self) -> watch::Receiver<Option<EndpointStatus>> {
        self.inner.discovery.endpoint()
    }

    pub fn stream_status(&self) -> watch::Receiver<StreamStatus> {
        self.inner.streaming.status()
    }

    pub fn self_identity(&self) -> watch::Receiver<Option<SelfIdentity>> {
        self.inner.streaming.self_identity()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Arc<NotificationUpdate>> {
        self.inner.streaming.notifications()
    }

    pub fn alarms(&self) -> broadcast::Receiver<Arc<ZoneNotification>> {
        self.inner.store.alarms()
    }

    pub fn streaming(&self) -> &Arc<StreamingService> {
        &self.inner.streaming
    }

    pub fn store(&self) -> &Arc<PathStore> {
        &self.inner.store
    }

    pub fn datasets(&self) -> &Arc<DatasetService> {
        &self.inner.datasets
    }

    /// Shorthand for [`PathStore::subscribe`].
    pub fn subscribe_path(&self, consumer: &str, path: &str, source: &str) -> PathStream {
        self.inner.store.subscribe(consumer, path, source)
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Stream data and metadata → path store.
    fn spawn_store_bridge(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut data_rx = self.inner.streaming.data_updates();
        let mut meta_rx = self.inner.streaming.meta_updates();
        let store = Arc::clone(&self.inner.store);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = meta_rx.recv() => match result {
                        Ok(update) => store.apply_meta(&update),
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "meta bridge: receiver lagged"),
                        Err(RecvError::Closed) => break,
                    },
                    result = data_rx.recv() => match result {
                        Ok(update) => store.apply_value(&update),
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "data bridge: receiver lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Discovered history URL → dataset engine, unless one was configured.
    async fn spawn_history_bridge(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut endpoint_rx = self.inner.discovery.endpoint();
        let datasets = Arc::clone(&self.inner.datasets);
        let (configured, transport) = {
            let config = self.inner.config.lock().await;
            (config.history_url.is_some(), config.transport())
        };

        tokio::spawn(async move {
            if configured {
                return;
            }
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = endpoint_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let history_url = endpoint_rx
                            .borrow_and_update()
                            .as_ref()
                            .and_then(|e| e.history_url.clone());
                        let Some(url) = history_url else { continue };

                        match HistoryClient::new(url.as_str(), &transport) {
                            Ok(client) => {
                                debug!(url = %url, "history source attached");
                                datasets.set_history_source(Some(Box::new(client)));
                            }
                            Err(e) => warn!(url = %url, error = %e, "history client unavailable"),
                        }
                    }
                }
            }
        })
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.machine.shutdown("controller dropped");
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn controller() -> Controller {
        Controller::new(ConnectionConfig::new(Url::parse("http://127.0.0.1:9").unwrap())).unwrap()
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let controller = controller();
        assert_eq!(
            controller.connection_status().borrow().state,
            ConnectionState::Disconnected
        );
        assert!(controller.endpoint().borrow().is_none());
        assert!(!controller.datasets().has_history_source());
    }

    #[test]
    fn connect_window_sums_the_ladder() {
        let controller = controller();
        assert_eq!(
            controller.connect_window(Duration::from_secs(2)),
            Duration::from_secs(12)
        );
    }

    #[tokio::test]
    async fn configured_history_url_is_used_directly() {
        let mut config = ConnectionConfig::new(Url::parse("http://127.0.0.1:9").unwrap());
        config.history_url = Some(Url::parse("http://127.0.0.1:9/signalk/v2/api/").unwrap());
        let controller = Controller::new(config).unwrap();
        assert!(controller.datasets().has_history_source());
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_harmless() {
        let controller = controller();
        controller.disconnect().await;
        controller.disconnect().await;
        assert_eq!(
            controller.connection_status().borrow().state,
            ConnectionState::Disconnected
        );
    }
}
