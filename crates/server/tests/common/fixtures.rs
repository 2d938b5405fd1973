//! Test fixtures: sample sites, a scripted builder, request helpers.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::HOST;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use bytes::Bytes;
use sitehist_cache::Builder;
use sitehist_core::{ArtifactSet, BuildError, BuildKey, BuildResult, CacheKey, Tag};
use sitehist_storage::ArtifactStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tower::ServiceExt;

/// Base domain the test server answers for.
pub const DOMAIN: &str = "sites.test";

/// Tag of `octo/site@abc123`.
#[allow(dead_code)]
pub const SAMPLE_TAG: &str = "4b96fc2c15f95ad409edccb0ee01f307";

/// Key of the sample site.
pub fn sample_key() -> CacheKey {
    CacheKey::new(BuildKey::new("octo", "site", "abc123"))
}

/// Host serving `tag`.
#[allow(dead_code)]
pub fn site_host(tag: &str) -> String {
    format!("{tag}.{DOMAIN}")
}

/// Stylesheet large and repetitive enough to be stored gzipped.
pub fn sample_css() -> String {
    "body { color: #333; margin: 0 auto; }\n".repeat(100)
}

/// A small site with an index, a subdirectory, a stylesheet and a 404 page.
pub fn sample_site() -> Vec<(String, Bytes)> {
    vec![
        ("index.html".to_string(), Bytes::from_static(b"<h1>home</h1>")),
        (
            "about/index.html".to_string(),
            Bytes::from_static(b"<h1>about</h1>"),
        ),
        ("css/site.css".to_string(), Bytes::from(sample_css())),
        ("404.html".to_string(), Bytes::from_static(b"<h1>lost</h1>")),
    ]
}

/// [`Builder`] that stores a fixed file list, or fails with a fixed error.
pub struct FixtureBuilder {
    store: Arc<ArtifactStore>,
    files: Vec<(String, Bytes)>,
    failure: Option<BuildError>,
    builds: AtomicUsize,
}

#[allow(dead_code)]
impl FixtureBuilder {
    pub fn new(store: Arc<ArtifactStore>, files: Vec<(String, Bytes)>) -> Self {
        Self {
            store,
            files,
            failure: None,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn failing(store: Arc<ArtifactStore>, failure: BuildError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(store, Vec::new())
        }
    }

    /// Number of times `build` ran.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Builder for FixtureBuilder {
    async fn lookup(&self, key: &CacheKey) -> BuildResult<Option<ArtifactSet>> {
        Ok(self
            .store
            .manifest(key.tag())
            .await?
            .map(|set| (*set).clone()))
    }

    async fn build(&self, key: &CacheKey) -> BuildResult<ArtifactSet> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers time to pile up on the in-flight load.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        let mut set = ArtifactSet::new(key.tag().clone(), key.build_key().clone());
        for (path, data) in &self.files {
            let entry = self
                .store
                .put(key.tag(), path, data.clone(), None, OffsetDateTime::now_utc())
                .await?;
            set.insert(entry);
        }
        self.store.commit(&set).await?;
        Ok(set)
    }
}

/// A collected response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Send a request with the given host and extra headers.
#[allow(dead_code)]
pub async fn send(
    router: &axum::Router,
    method: Method,
    host: &str,
    uri: &str,
    headers: &[(&str, &str)],
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri).header(HOST, host);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

/// GET with the given host.
#[allow(dead_code)]
pub async fn get(router: &axum::Router, host: &str, uri: &str) -> TestResponse {
    send(router, Method::GET, host, uri, &[]).await
}

/// Parse a tag constant.
#[allow(dead_code)]
pub fn tag(s: &str) -> Tag {
    Tag::parse(s).unwrap()
}
