//! Tavily client against a mock HTTP server

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use research_workflow::{CollaboratorError, SearchProvider, TavilySearchProvider};

fn provider(server: &MockServer) -> TavilySearchProvider {
    TavilySearchProvider::new("test-key")
        .with_base_url(server.uri())
        .with_max_retries(2)
        .with_retry_base_delay(Duration::from_millis(1))
}

fn results_body() -> serde_json::Value {
    json!({
        "query": "heat pumps",
        "results": [
            {
                "title": "Heat pump",
                "url": "https://en.wikipedia.org/wiki/Heat_pump",
                "content": "A heat pump transfers thermal energy.",
                "score": 0.92
            },
            {
                "title": "How heat pumps work",
                "url": "https://www.energy.gov/heat-pumps",
                "score": 0.81
            }
        ]
    })
}

#[tokio::test]
async fn test_search_returns_hits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"query": "heat pumps", "max_results": 5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(results_body()))
        .expect(1)
        .mount(&server)
        .await;

    let hits = provider(&server).search("heat pumps", 5).await.unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].url, "https://en.wikipedia.org/wiki/Heat_pump");
    assert_eq!(hits[0].excerpt, "A heat pump transfers thermal energy.");
    assert!((hits[0].score - 0.92).abs() < 1e-6);
    assert_eq!(hits[1].excerpt, "");
}

#[tokio::test]
async fn test_retries_after_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results_body()))
        .mount(&server)
        .await;

    let hits = provider(&server).search("heat pumps", 5).await.unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn test_persistent_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .expect(3)
        .mount(&server)
        .await;

    let err = provider(&server).search("heat pumps", 5).await.unwrap_err();
    assert!(matches!(err, CollaboratorError::Unavailable(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server).search("heat pumps", 5).await.unwrap_err();
    assert!(matches!(err, CollaboratorError::Malformed(_)));
}

#[tokio::test]
async fn test_unparseable_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = provider(&server).search("heat pumps", 5).await.unwrap_err();
    assert!(matches!(err, CollaboratorError::Malformed(_)));
}
