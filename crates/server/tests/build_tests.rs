//! Integration tests for build redirects, the peer endpoint, health and metrics.

mod common;

use axum::http::StatusCode;
use common::{DOMAIN, FixtureBuilder, SAMPLE_TAG, TestServer, get, sample_key, site_host};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use sitehist_core::{ArtifactSet, BuildError};
use std::sync::Arc;

#[tokio::test]
async fn test_build_redirects_to_tag_host() {
    let server = TestServer::new().await;

    let response = get(
        &server.router,
        DOMAIN,
        "/u/octo/r/site/c/abc123/b/about/?lang=en",
    )
    .await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(
        response.header("location"),
        Some("https://4b96fc2c15f95ad409edccb0ee01f307.sites.test/about/?lang=en")
    );
    assert_eq!(response.header("cache-control"), Some("max-age=0"));
    assert!(response.header("server").unwrap().starts_with("sitehist/"));
    assert_eq!(server.fixture().builds(), 1);
}

#[tokio::test]
async fn test_build_redirect_without_path() {
    let server = TestServer::new().await;
    let expected = format!("https://{}/", site_host(SAMPLE_TAG));

    for uri in ["/u/octo/r/site/c/abc123/b", "/u/octo/r/site/c/abc123/b/"] {
        let response = get(&server.router, DOMAIN, uri).await;
        assert_eq!(response.status, StatusCode::FOUND, "{uri}");
        assert_eq!(response.header("location"), Some(expected.as_str()));
    }
}

#[tokio::test]
async fn test_build_redirect_keeps_path_encoding() {
    let server = TestServer::new().await;

    let response = get(
        &server.router,
        "sites.test:8080",
        "/u/octo/r/site/c/abc123/b/posts/hello%20world.html",
    )
    .await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(
        response.header("location"),
        Some("https://4b96fc2c15f95ad409edccb0ee01f307.sites.test/posts/hello%20world.html")
    );
}

#[tokio::test]
async fn test_redirect_scheme_is_configurable() {
    let server = TestServer::with_config(|config| {
        config.server.redirect_scheme = "http".to_string();
    })
    .await;

    let response = get(&server.router, DOMAIN, "/u/octo/r/site/c/abc123/b/").await;
    assert_eq!(
        response.header("location"),
        Some("http://4b96fc2c15f95ad409edccb0ee01f307.sites.test/")
    );
}

#[tokio::test]
async fn test_builds_are_memoized() {
    let server = TestServer::new().await;

    for _ in 0..3 {
        let response = get(&server.router, DOMAIN, "/u/octo/r/site/c/abc123/b/").await;
        assert_eq!(response.status, StatusCode::FOUND);
    }
    assert_eq!(server.fixture().builds(), 1);

    // A different commit is a different tag and a second build.
    let response = get(&server.router, DOMAIN, "/u/octo/r/site/c/def456/b/").await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_ne!(
        response.header("location"),
        Some(format!("https://{}/", site_host(SAMPLE_TAG)).as_str())
    );
    assert_eq!(server.fixture().builds(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_build() {
    let server = Arc::new(TestServer::new().await);

    let mut handles = Vec::new();
    for i in 0..20 {
        let server = server.clone();
        handles.push(tokio::spawn(async move {
            let uri = format!("/u/octo/r/site/c/abc123/b/page-{i}.html");
            get(&server.router, DOMAIN, &uri).await.status
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::FOUND);
    }
    assert_eq!(server.fixture().builds(), 1);
}

#[tokio::test]
async fn test_build_failures_map_to_status_and_are_not_memoized() {
    let server = TestServer::with_fixture(|artifacts| {
        FixtureBuilder::failing(artifacts, BuildError::upstream_not_found("no such commit"))
    })
    .await;

    for attempt in 1..=2 {
        let response = get(&server.router, DOMAIN, "/u/octo/r/site/c/abc123/b/").await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.json()["code"], "upstream_not_found");
        assert_eq!(response.header("cache-control"), Some("max-age=0"));
        assert_eq!(response.header("location"), None);
        assert_eq!(server.fixture().builds(), attempt);
    }
}

#[tokio::test]
async fn test_upstream_unavailable_is_bad_gateway() {
    let server = TestServer::with_fixture(|artifacts| {
        FixtureBuilder::failing(artifacts, BuildError::upstream_unavailable("timed out"))
    })
    .await;

    let response = get(&server.router, DOMAIN, "/u/octo/r/site/c/abc123/b/").await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.json()["code"], "upstream_unavailable");
}

#[tokio::test]
async fn test_generator_failure_is_server_error() {
    let server = TestServer::with_fixture(|artifacts| {
        FixtureBuilder::failing(artifacts, BuildError::build_failed("jekyll exited with 1"))
    })
    .await;

    let response = get(&server.router, DOMAIN, "/u/octo/r/site/c/abc123/b/").await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["code"], "build_failed");
}

#[tokio::test]
async fn test_unknown_app_paths_are_not_found() {
    let server = TestServer::new().await;

    let response = get(&server.router, DOMAIN, "/u/octo/r/site").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(server.fixture().builds(), 0);
}

#[tokio::test]
async fn test_build_routes_refuse_foreign_hosts() {
    let server = TestServer::new().await;

    let response = get(&server.router, "evil.example", "/u/octo/r/site/c/abc123/b/").await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(server.fixture().builds(), 0);
}

fn peer_uri(raw_key: &str) -> String {
    format!("/_buildcache/{}", utf8_percent_encode(raw_key, NON_ALPHANUMERIC))
}

#[tokio::test]
async fn test_peer_endpoint_builds_locally() {
    let server = TestServer::new().await;

    // Peers address nodes by URL, so any host is accepted.
    let response = get(&server.router, "10.0.0.7:8080", &peer_uri(&sample_key().encode())).await;
    assert_eq!(response.status, StatusCode::OK);
    let set: ArtifactSet = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(set.tag.as_str(), SAMPLE_TAG);
    assert_eq!(set.key.owner, "octo");
    assert!(set.contains("index.html"));
    assert!(set.contains("css/site.css"));
    assert_eq!(server.fixture().builds(), 1);

    // The redirect path now finds the set in memory.
    let response = get(&server.router, DOMAIN, "/u/octo/r/site/c/abc123/b/").await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(server.fixture().builds(), 1);
}

#[tokio::test]
async fn test_peer_endpoint_rejects_bad_keys() {
    let server = TestServer::new().await;

    let wrong_tag = format!("{}\0octo\0site\0abc123", "0".repeat(32));
    for raw in ["garbage", "a\0b", wrong_tag.as_str()] {
        let response = get(&server.router, DOMAIN, &peer_uri(raw)).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{raw:?}");
        let err: BuildError = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(err.kind.code(), "invalid_request");
    }
    assert_eq!(server.fixture().builds(), 0);
}

#[tokio::test]
async fn test_peer_endpoint_returns_build_error() {
    let server = TestServer::with_fixture(|artifacts| {
        FixtureBuilder::failing(artifacts, BuildError::upstream_unavailable("rate limited"))
    })
    .await;

    let response = get(&server.router, DOMAIN, &peer_uri(&sample_key().encode())).await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    let err: BuildError = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(err, BuildError::upstream_unavailable("rate limited"));
}

#[tokio::test]
async fn test_health_on_service_and_unknown_hosts() {
    let server = TestServer::new().await;

    for host in [DOMAIN, "elsewhere.example", "10.0.0.7:8080"] {
        let response = get(&server.router, host, "/v1/health").await;
        assert_eq!(response.status, StatusCode::OK, "{host}");
        assert_eq!(response.json()["status"], "ok");
    }
}

#[tokio::test]
async fn test_metrics_endpoint() {
    sitehist_server::metrics::register_metrics();
    let server = TestServer::new().await;
    get(&server.router, DOMAIN, "/u/octo/r/site/c/abc123/b/").await;
    get(&server.router, &site_host(SAMPLE_TAG), "/").await;

    let response = get(&server.router, DOMAIN, "/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    let text = response.text();
    assert!(text.contains("sitehist_cache_events_total{event=\"local_builds\"}"));
    assert!(text.contains("sitehist_artifact_responses_total{status=\"200\"}"));
    assert!(text.contains("sitehist_build_requests_total{outcome=\"redirect\"}"));
}

#[tokio::test]
async fn test_metrics_can_be_disabled() {
    let server = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;

    let response = get(&server.router, DOMAIN, "/metrics").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
