#![allow(clippy::unwrap_used)]
// Integration tests for `HistoryClient` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skipper_api::{Error, HistoryClient, HistoryQuery};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HistoryClient) {
    let server = MockServer::start().await;
    let base = format!("{}/signalk/v2/api", server.uri());
    let client = HistoryClient::with_client(reqwest::Client::new(), &base).unwrap();
    (server, client)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_values_sends_query_and_decodes_rows() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/signalk/v2/api/history/values"))
        .and(query_param("paths", "environment.wind.speedTrue:average"))
        .and(query_param("resolution", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "context": "vessels.self",
            "range": { "from": "2025-01-01T00:00:00Z", "to": "2025-01-01T00:00:06Z" },
            "values": [{ "path": "environment.wind.speedTrue", "method": "average" }],
            "data": [
                ["2025-01-01T00:00:00Z", 2.0],
                ["2025-01-01T00:00:03Z", 4.0],
                ["2025-01-01T00:00:06Z", 6.0]
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = HistoryQuery {
        paths: vec!["environment.wind.speedTrue:average".into()],
        resolution: Some(3),
        ..HistoryQuery::default()
    };
    let resp = client.values(&query).await.unwrap();

    let values: Vec<Option<f64>> = resp.rows().into_iter().map(|r| r.values[0]).collect();
    assert_eq!(values, vec![Some(2.0), Some(4.0), Some(6.0)]);
    assert_eq!(resp.values[0].method.as_deref(), Some("average"));
}

#[tokio::test]
async fn test_missing_plugin_is_an_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/signalk/v2/api/history/values"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let query = HistoryQuery {
        paths: vec!["navigation.speedOverGround:average".into()],
        ..HistoryQuery::default()
    };
    let err = client.values(&query).await.unwrap_err();
    assert!(err.is_not_found(), "expected 404, got: {err:?}");
}

#[tokio::test]
async fn test_garbage_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/signalk/v2/api/history/values"))
        .respond_with(ResponseTemplate::new(200).set_body_string("oops"))
        .mount(&server)
        .await;

    let result = client.values(&HistoryQuery::default()).await;
    assert!(matches!(result, Err(Error::Deserialization { .. })));
}
