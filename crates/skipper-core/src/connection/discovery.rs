// ── Discovery service ──
//
// Runs the discovery handshake for the configured server, reports the
// outcome to the state machine and publishes an `EndpointStatus` snapshot
// after every attempt. Retries are driven by the state machine through the
// hook installed by `attach_retry`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use skipper_api::{DiscoveryClient, DiscoveryResponse, ServerInfo};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use super::state::ConnectionStateMachine;
use crate::error::CoreError;
use crate::model::EndpointStatus;

const HISTORY_API_PATH: &str = "signalk/v2/api";

/// Parameters of the current connection, kept for retries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DiscoveryParams {
    /// Bumped by every `initialize_connection`; retries reuse it.
    generation: u64,
    url: String,
    proxy_enabled: bool,
    subscribe_all: bool,
}

pub struct DiscoveryService {
    client: DiscoveryClient,
    machine: ConnectionStateMachine,
    endpoint: watch::Sender<Option<EndpointStatus>>,
    params: Mutex<Option<DiscoveryParams>>,
    generation: AtomicU64,
    discovery_timeout: Duration,
    validation_timeout: Duration,
}

impl DiscoveryService {
    pub fn new(
        client: DiscoveryClient,
        machine: ConnectionStateMachine,
        discovery_timeout: Duration,
        validation_timeout: Duration,
    ) -> Self {
        let (endpoint, _) = watch::channel(None);
        Self {
            client,
            machine,
            endpoint,
            params: Mutex::new(None),
            generation: AtomicU64::new(0),
            discovery_timeout,
            validation_timeout,
        }
    }

    /// Register `retry_current_connection` as the state machine's discovery
    /// retry hook. The hook holds only a weak reference.
    pub fn attach_retry(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.machine.set_http_retry_callback(Arc::new(move || {
            if let Some(service) = weak.upgrade() {
                tokio::spawn(async move { service.retry_current_connection().await });
            }
        }));
    }

    /// Latest endpoint status. `None` until the first attempt completes.
    pub fn endpoint(&self) -> watch::Receiver<Option<EndpointStatus>> {
        self.endpoint.subscribe()
    }

    /// Pre-flight check of a user-entered URL. No shared state is touched.
    pub async fn validate_url(&self, url: &str) -> Result<ServerInfo, CoreError> {
        let doc = self.client.validate(url, self.validation_timeout).await?;
        Ok(doc.server)
    }

    /// Store the parameters for later retries and run discovery.
    pub async fn initialize_connection(&self, url: &str, proxy_enabled: bool, subscribe_all: bool) {
        let params = {
            let mut slot = self.lock_params();
            let params = DiscoveryParams {
                generation: self.generation.fetch_add(1, Ordering::AcqRel) + 1,
                url: url.to_owned(),
                proxy_enabled,
                subscribe_all,
            };
            *slot = Some(params.clone());
            params
        };
        // Consumers of the previous endpoint let go of it right away.
        self.endpoint.send_if_modified(|endpoint| endpoint.take().is_some());
        self.machine.start_discovery("initializing connection");
        self.run(&params).await;
    }

    /// Re-run discovery with the stored parameters. Retry bookkeeping is
    /// left to the state machine.
    pub async fn retry_current_connection(&self) {
        let params = self.lock_params().clone();
        let Some(params) = params else {
            debug!("retry requested before any connection was initialized");
            return;
        };
        info!(url = %params.url, "retrying discovery");
        self.run(&params).await;
    }

    async fn run(&self, params: &DiscoveryParams) {
        let outcome = match self.client.discover(&params.url, self.discovery_timeout).await {
            Ok(doc) => resolve_endpoints(&doc, &params.url, params.proxy_enabled)
                .map(|urls| (doc, urls))
                .ok_or_else(|| CoreError::NotSignalK {
                    url: params.url.clone(),
                }),
            Err(e) => Err(CoreError::from(e)),
        };

        // Held while reporting so a newer `initialize_connection` cannot
        // start its cycle between the check and the report.
        let current = self.lock_params();
        if self.generation.load(Ordering::Acquire) != params.generation {
            debug!(
                url = %params.url,
                generation = params.generation,
                "discarding outcome of superseded discovery"
            );
            return;
        }

        match outcome {
            Ok((doc, (http, ws))) => {
                let server = doc.server.description();
                info!(server = %server, http = %http, ws = %ws, "discovery succeeded");
                let status = EndpointStatus {
                    operation: 2,
                    message: format!("Connected to {server}"),
                    server_description: Some(server),
                    history_url: history_url(&http),
                    http_service_url: Some(http),
                    ws_service_url: Some(ws),
                    subscribe_all: params.subscribe_all,
                };
                self.machine.on_discovery_success();
                self.endpoint.send_replace(Some(status));
            }
            Err(e) => {
                let message = e.to_string();
                warn!(url = %params.url, error = %message, "discovery failed");
                self.endpoint.send_replace(Some(EndpointStatus {
                    operation: 3,
                    message: message.clone(),
                    server_description: None,
                    http_service_url: None,
                    ws_service_url: None,
                    subscribe_all: params.subscribe_all,
                    history_url: None,
                }));
                self.machine.on_discovery_error(&message);
            }
        }
        drop(current);
    }

    fn lock_params(&self) -> std::sync::MutexGuard<'_, Option<DiscoveryParams>> {
        self.params
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ── URL resolution ───────────────────────────────────────────────────

/// Compute the HTTP and streaming service URLs from a discovery document.
///
/// With `proxy_enabled` the advertised scheme/host/port are replaced by the
/// base URL's. A secure base upgrades `ws` to `wss` and `http` to `https`.
pub fn resolve_endpoints(doc: &DiscoveryResponse, base: &str, proxy_enabled: bool) -> Option<(Url, Url)> {
    let (mut http, mut ws) = doc.service_urls()?;
    let base = Url::parse(base.trim()).ok()?;
    let secure = base.scheme() == "https";

    if proxy_enabled {
        rehost(&mut http, &base)?;
        rehost(&mut ws, &base)?;
        http.set_scheme(base.scheme()).ok()?;
        ws.set_scheme(if secure { "wss" } else { "ws" }).ok()?;
    } else if secure {
        if http.scheme() == "http" {
            http.set_scheme("https").ok()?;
        }
        if ws.scheme() == "ws" {
            ws.set_scheme("wss").ok()?;
        }
    }
    Some((http, ws))
}

fn rehost(url: &mut Url, base: &Url) -> Option<()> {
    url.set_host(base.host_str()).ok()?;
    url.set_port(base.port()).ok()?;
    Some(())
}

/// `{origin}/signalk/v2/api/` of the HTTP service.
fn history_url(http: &Url) -> Option<Url> {
    let origin = http.origin().ascii_serialization();
    Url::parse(&format!("{origin}/{HISTORY_API_PATH}/")).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> DiscoveryResponse {
        serde_json::from_value(json!({
            "endpoints": { "v1": {
                "version": "1.7.0",
                "signalk-http": "http://10.0.0.5:3000/signalk/v1/api/",
                "signalk-ws": "ws://10.0.0.5:3000/signalk/v1/stream"
            }},
            "server": { "id": "signalk-server-node", "version": "2.8.0" }
        }))
        .unwrap()
    }

    #[test]
    fn advertised_urls_are_used_as_is() {
        let (http, ws) = resolve_endpoints(&doc(), "http://10.0.0.5:3000", false).unwrap();
        assert_eq!(http.as_str(), "http://10.0.0.5:3000/signalk/v1/api/");
        assert_eq!(ws.as_str(), "ws://10.0.0.5:3000/signalk/v1/stream");
    }

    #[test]
    fn proxy_mode_rewrites_scheme_host_and_port() {
        let (http, ws) = resolve_endpoints(&doc(), "https://boat.example.com", true).unwrap();
        assert_eq!(http.as_str(), "https://boat.example.com/signalk/v1/api/");
        assert_eq!(ws.as_str(), "wss://boat.example.com/signalk/v1/stream");
    }

    #[test]
    fn secure_base_upgrades_schemes() {
        let (http, ws) = resolve_endpoints(&doc(), "https://10.0.0.5:3443", false).unwrap();
        assert_eq!(http.scheme(), "https");
        assert_eq!(ws.scheme(), "wss");
        assert_eq!(ws.port(), Some(3000));
    }

    #[test]
    fn history_url_uses_http_origin() {
        let http = Url::parse("http://10.0.0.5:3000/signalk/v1/api/").unwrap();
        assert_eq!(
            history_url(&http).unwrap().as_str(),
            "http://10.0.0.5:3000/signalk/v2/api/"
        );
    }

    #[tokio::test]
    async fn retry_without_parameters_is_a_no_op() {
        let machine = ConnectionStateMachine::new(crate::config::RetryPolicy::default());
        let service = DiscoveryService::new(
            DiscoveryClient::new(&skipper_api::TransportConfig::default()).unwrap(),
            machine.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        service.retry_current_connection().await;
        assert!(service.endpoint().borrow().is_none());
        assert_eq!(machine.state(), crate::connection::ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn superseded_attempt_is_not_counted() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/signalk/"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let machine = ConnectionStateMachine::new(crate::config::RetryPolicy::default());
        let service = DiscoveryService::new(
            DiscoveryClient::new(&skipper_api::TransportConfig::default()).unwrap(),
            machine.clone(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        // Same URL twice: the first attempt is still in flight when the
        // second cycle starts.
        let url = server.uri();
        tokio::join!(
            service.initialize_connection(&url, false, true),
            service.initialize_connection(&url, false, true),
        );

        assert_eq!(machine.state(), crate::connection::ConnectionState::HttpError);
        assert_eq!(machine.http_retry_count(), 1);
    }
}
