// Signal K discovery handshake
//
// `GET {base}/signalk/` returns the server's identity and the URLs of its
// HTTP and WebSocket services. This module performs the request and
// classifies failures; it owns no shared state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

const DISCOVERY_PATH: &str = "signalk";

// ── Models ───────────────────────────────────────────────────────────

/// Body of the discovery document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub server: ServerInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    pub v1: Option<EndpointsV1>,
}

/// Service descriptors advertised under `endpoints.v1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsV1 {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "signalk-http", default)]
    pub http: Option<String>,
    #[serde(rename = "signalk-ws", default)]
    pub ws: Option<String>,
    #[serde(rename = "signalk-tcp", default)]
    pub tcp: Option<String>,
}

/// Server identity (`server.id`, `server.version`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ServerInfo {
    /// Human-readable `"{id} {version}"`, falling back to `"unknown"`.
    pub fn description(&self) -> String {
        match (self.id.as_deref(), self.version.as_deref()) {
            (Some(id), Some(version)) => format!("{id} {version}"),
            (Some(id), None) => id.to_owned(),
            (None, Some(version)) => format!("unknown {version}"),
            (None, None) => "unknown".into(),
        }
    }
}

impl DiscoveryResponse {
    /// The advertised `(signalk-http, signalk-ws)` URLs, if both are present
    /// and parse.
    pub fn service_urls(&self) -> Option<(Url, Url)> {
        let v1 = self.endpoints.v1.as_ref()?;
        let http = Url::parse(v1.http.as_deref()?).ok()?;
        let ws = Url::parse(v1.ws.as_deref()?).ok()?;
        Some((http, ws))
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Performs the discovery request against a Signal K server.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http: reqwest::Client,
}

impl DiscoveryClient {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Build the discovery URL for a base URL, appending `/signalk/`
    /// unless the path already ends in it.
    pub fn discovery_url(base: &str) -> Result<Url, Error> {
        let mut url = Url::parse(base.trim())?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::UnsupportedScheme {
                    scheme: other.to_owned(),
                });
            }
        }

        let path = url.path().trim_end_matches('/').to_owned();
        if path.ends_with(&format!("/{DISCOVERY_PATH}")) {
            url.set_path(&format!("{path}/"));
        } else {
            url.set_path(&format!("{path}/{DISCOVERY_PATH}/"));
        }
        url.set_query(None);
        Ok(url)
    }

    /// Pre-flight check of a user-entered URL.
    ///
    /// Short timeout, no side effects. Every failure is classified into a
    /// descriptive [`Error`] variant.
    pub async fn validate(&self, base: &str, timeout: Duration) -> Result<DiscoveryResponse, Error> {
        debug!(url = base, "validating Signal K URL");
        self.fetch(base, timeout).await
    }

    /// Discovery request used when establishing a connection.
    pub async fn discover(&self, base: &str, timeout: Duration) -> Result<DiscoveryResponse, Error> {
        debug!(url = base, "running Signal K discovery");
        self.fetch(base, timeout).await
    }

    async fn fetch(&self, base: &str, timeout: Duration) -> Result<DiscoveryResponse, Error> {
        let url = Self::discovery_url(base)?;
        let timeout_secs = timeout.as_secs();

        let resp = self
            .http
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::from_send(e, &url, timeout_secs))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::from_status(status, &url));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::from_send(e, &url, timeout_secs))?;

        // Anything that is not a discovery document counts as "not Signal K",
        // even when the HTTP layer said 200.
        let Ok(doc) = serde_json::from_str::<DiscoveryResponse>(&body) else {
            return Err(Error::NotSignalK {
                url: url.to_string(),
            });
        };
        if doc.service_urls().is_none() {
            return Err(Error::NotSignalK {
                url: url.to_string(),
            });
        }

        debug!(server = %doc.server.description(), "discovery document received");
        Ok(doc)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_appends_signalk_path() {
        let url = DiscoveryClient::discovery_url("http://boat.local:3000").unwrap();
        assert_eq!(url.as_str(), "http://boat.local:3000/signalk/");
    }

    #[test]
    fn discovery_url_keeps_existing_signalk_path() {
        let url = DiscoveryClient::discovery_url("https://boat.local/signalk").unwrap();
        assert_eq!(url.as_str(), "https://boat.local/signalk/");

        let url = DiscoveryClient::discovery_url("https://boat.local/signalk/").unwrap();
        assert_eq!(url.as_str(), "https://boat.local/signalk/");
    }

    #[test]
    fn discovery_url_rejects_other_schemes() {
        let err = DiscoveryClient::discovery_url("ftp://boat.local").unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme { ref scheme } if scheme == "ftp"));
        assert!(matches!(
            DiscoveryClient::discovery_url("not a url"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn service_urls_require_both_endpoints() {
        let doc: DiscoveryResponse = serde_json::from_value(serde_json::json!({
            "endpoints": { "v1": {
                "version": "1.7.0",
                "signalk-http": "http://boat.local:3000/signalk/v1/api/",
                "signalk-ws": "ws://boat.local:3000/signalk/v1/stream"
            }},
            "server": { "id": "signalk-server-node", "version": "2.8.0" }
        }))
        .unwrap();
        let (http, ws) = doc.service_urls().unwrap();
        assert_eq!(http.path(), "/signalk/v1/api/");
        assert_eq!(ws.scheme(), "ws");
        assert_eq!(doc.server.description(), "signalk-server-node 2.8.0");

        let partial: DiscoveryResponse = serde_json::from_value(serde_json::json!({
            "endpoints": { "v1": { "signalk-http": "http://boat.local/signalk/v1/api/" } }
        }))
        .unwrap();
        assert!(partial.service_urls().is_none());
    }
}
