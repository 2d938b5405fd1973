//! Integration tests for artifact serving on tag hosts.

mod common;

use axum::http::{Method, StatusCode};
use common::{DOMAIN, SAMPLE_TAG, TestServer, get, sample_css, send, site_host};
use flate2::read::GzDecoder;
use std::io::Read;

fn gunzip(data: &[u8]) -> String {
    let mut out = String::new();
    GzDecoder::new(data).read_to_string(&mut out).unwrap();
    out
}

#[tokio::test]
async fn test_serves_index_with_immutable_headers() {
    let server = TestServer::new().await;
    let tag = server.build_sample().await;
    assert_eq!(tag.as_str(), SAMPLE_TAG);

    let response = get(&server.router, &site_host(SAMPLE_TAG), "/").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "<h1>home</h1>");
    assert!(response.header("content-type").unwrap().starts_with("text/html"));
    assert_eq!(response.header("content-length"), Some("13"));
    assert_eq!(
        response.header("cache-control"),
        Some("public, max-age=315360000")
    );
    assert_eq!(
        response.header("etag"),
        Some(format!("\"{SAMPLE_TAG}\"").as_str())
    );
    assert!(response.header("server").unwrap().starts_with("sitehist/"));
    assert_eq!(response.header("vary"), None);
}

#[tokio::test]
async fn test_tag_host_is_case_insensitive_and_ignores_port() {
    let server = TestServer::new().await;
    server.build_sample().await;

    let host = format!("{}.{}:8080", SAMPLE_TAG.to_ascii_uppercase(), DOMAIN);
    let response = get(&server.router, &host, "/").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "<h1>home</h1>");
}

#[tokio::test]
async fn test_if_none_match_returns_not_modified() {
    let server = TestServer::new().await;
    server.build_sample().await;
    let etag = format!("\"{SAMPLE_TAG}\"");

    for value in [etag.as_str(), "*", "\"nope\", W/\"4b96fc2c15f95ad409edccb0ee01f307\""] {
        let response = send(
            &server.router,
            Method::GET,
            &site_host(SAMPLE_TAG),
            "/about/",
            &[("if-none-match", value)],
        )
        .await;
        assert_eq!(response.status, StatusCode::NOT_MODIFIED, "{value}");
        assert!(response.body.is_empty());
        assert_eq!(response.header("etag"), Some(etag.as_str()));
    }

    let response = send(
        &server.router,
        Method::GET,
        &site_host(SAMPLE_TAG),
        "/about/",
        &[("if-none-match", "\"something-else\"")],
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_conditional_check_precedes_lookup() {
    // Nothing built: the tag itself is the validator.
    let server = TestServer::new().await;
    let response = send(
        &server.router,
        Method::GET,
        &site_host(SAMPLE_TAG),
        "/missing.html",
        &[("if-none-match", "*")],
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_MODIFIED);
    assert_eq!(server.fixture().builds(), 0);
}

#[tokio::test]
async fn test_index_html_redirects_to_directory() {
    let server = TestServer::new().await;
    server.build_sample().await;
    let host = site_host(SAMPLE_TAG);

    let response = get(&server.router, &host, "/about/index.html").await;
    assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.header("location"), Some("./"));

    let response = get(&server.router, &host, "/index.html?lang=en").await;
    assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.header("location"), Some("./?lang=en"));
}

#[tokio::test]
async fn test_directory_paths_resolve_to_index() {
    let server = TestServer::new().await;
    server.build_sample().await;
    let host = site_host(SAMPLE_TAG);

    for path in ["/about/", "/about"] {
        let response = get(&server.router, &host, path).await;
        assert_eq!(response.status, StatusCode::OK, "{path}");
        assert_eq!(response.text(), "<h1>about</h1>");
    }
}

#[tokio::test]
async fn test_gzip_passthrough_for_accepting_clients() {
    let server = TestServer::new().await;
    server.build_sample().await;

    let response = send(
        &server.router,
        Method::GET,
        &site_host(SAMPLE_TAG),
        "/css/site.css",
        &[("accept-encoding", "br, gzip")],
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-encoding"), Some("gzip"));
    assert_eq!(response.header("vary"), Some("Accept-Encoding"));
    assert!(response.header("content-type").unwrap().starts_with("text/css"));
    assert_eq!(
        response.header("content-length"),
        Some(response.body.len().to_string().as_str())
    );
    assert!(response.body.len() < sample_css().len());
    assert_eq!(gunzip(&response.body), sample_css());
}

#[tokio::test]
async fn test_gzip_decoded_for_identity_clients() {
    let server = TestServer::new().await;
    server.build_sample().await;

    let response = get(&server.router, &site_host(SAMPLE_TAG), "/css/site.css").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-encoding"), None);
    assert_eq!(response.header("vary"), Some("Accept-Encoding"));
    assert_eq!(
        response.header("content-length"),
        Some(sample_css().len().to_string().as_str())
    );
    assert_eq!(response.text(), sample_css());
}

#[tokio::test]
async fn test_head_has_headers_but_no_body() {
    let server = TestServer::new().await;
    server.build_sample().await;

    let response = send(
        &server.router,
        Method::HEAD,
        &site_host(SAMPLE_TAG),
        "/",
        &[],
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());
    assert_eq!(response.header("content-length"), Some("13"));
}

#[tokio::test]
async fn test_custom_not_found_page() {
    let server = TestServer::new().await;
    server.build_sample().await;

    let response = get(&server.router, &site_host(SAMPLE_TAG), "/no/such/page").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "<h1>lost</h1>");
    assert!(response.header("content-type").unwrap().starts_with("text/html"));
}

#[tokio::test]
async fn test_generic_not_found_without_custom_page() {
    let server = TestServer::with_fixture(|artifacts| {
        common::FixtureBuilder::new(
            artifacts,
            vec![("index.html".to_string(), bytes::Bytes::from_static(b"hi"))],
        )
    })
    .await;
    server.build_sample().await;

    let response = get(&server.router, &site_host(SAMPLE_TAG), "/missing").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["code"], "not_found");
    assert_eq!(response.header("etag"), None);
    assert_eq!(response.header("cache-control"), None);
}

#[tokio::test]
async fn test_unbuilt_tag_is_not_found_and_never_builds() {
    let server = TestServer::new().await;

    let response = get(&server.router, &site_host(SAMPLE_TAG), "/").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(server.fixture().builds(), 0);
}

#[tokio::test]
async fn test_traversal_paths_are_not_found() {
    let server = TestServer::new().await;
    server.build_sample().await;
    let host = site_host(SAMPLE_TAG);

    for path in ["/../index.html.bak", "/css/%2e%2e/index.html.x", "/a%5Cb"] {
        let response = get(&server.router, &host, path).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{path}");
        // Served the site's own 404 page, nothing from outside the tag.
        assert_eq!(response.text(), "<h1>lost</h1>");
    }
}

#[tokio::test]
async fn test_options_and_disallowed_methods() {
    let server = TestServer::new().await;
    let host = site_host(SAMPLE_TAG);

    let response = send(&server.router, Method::OPTIONS, &host, "/", &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("allow"), Some("GET, HEAD, OPTIONS"));
    assert!(response.body.is_empty());

    for method in [Method::POST, Method::PUT, Method::DELETE] {
        let response = send(&server.router, method.clone(), &host, "/", &[]).await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_eq!(response.header("allow"), Some("GET, HEAD, OPTIONS"));
    }
}

#[tokio::test]
async fn test_foreign_hosts_are_forbidden() {
    let server = TestServer::new().await;
    server.build_sample().await;

    for host in [
        "example.com",
        "www.sites.test",
        "4b96fc2c15f95ad409edccb0ee01f30.sites.test",
        "4b96fc2c15f95ad409edccb0ee01f307.other.test",
    ] {
        let response = get(&server.router, host, "/").await;
        assert_eq!(response.status, StatusCode::FORBIDDEN, "{host}");
        assert_eq!(response.json()["code"], "forbidden");
    }
}

#[tokio::test]
async fn test_build_paths_on_tag_host_are_site_paths() {
    let server = TestServer::new().await;
    server.build_sample().await;

    let response = get(
        &server.router,
        &site_host(SAMPLE_TAG),
        "/u/octo/r/site/c/abc123/b/",
    )
    .await;
    // Not a redirect: the tag host only ever serves artifacts.
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "<h1>lost</h1>");
}

#[tokio::test]
async fn test_service_paths_on_tag_host_are_site_paths() {
    let server = TestServer::with_fixture(|artifacts| {
        common::FixtureBuilder::new(
            artifacts,
            vec![
                ("index.html".to_string(), bytes::Bytes::from_static(b"hi")),
                ("v1/health".to_string(), bytes::Bytes::from_static(b"all good")),
                (
                    "_buildcache/notes.txt".to_string(),
                    bytes::Bytes::from_static(b"cache notes"),
                ),
            ],
        )
    })
    .await;
    server.build_sample().await;
    let host = site_host(SAMPLE_TAG);

    let response = get(&server.router, &host, "/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "all good");

    let response = get(&server.router, &host, "/_buildcache/notes.txt").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "cache notes");

    // A key-shaped path is still a site path, so nothing is built.
    let raw = format!("/_buildcache/{}", sample_key_path());
    let response = get(&server.router, &host, &raw).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(server.fixture().builds(), 1);
}

fn sample_key_path() -> String {
    common::sample_key().encode().replace('\0', "%00")
}
