//! Artifact serving on `<tag>.<domain>` hosts.
//!
//! Everything under a tag is immutable, so responses carry a long-lived
//! `Cache-Control` and the tag as their ETag. The conditional check runs
//! before any store lookup.

use crate::compression::{accepts_gzip, negotiate};
use crate::error::{ALLOWED_METHODS, ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{
    ALLOW, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
    LOCATION, VARY,
};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use sitehist_core::Tag;
use sitehist_storage::{IMMUTABLE_CACHE_CONTROL, StoredObject};

const INDEX: &str = "index.html";
const NOT_FOUND_PAGE: &str = "404.html";

/// Serve a request addressed to a tag host.
pub async fn serve_site(state: &AppState, tag: &Tag, req: Request) -> Response {
    // `Parts` is Sync; `Request` is not. The body is never read.
    let (parts, _body) = req.into_parts();
    let response = match respond(state, tag, &parts).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    metrics::record_artifact_response(response.status());
    response
}

async fn respond(state: &AppState, tag: &Tag, req: &Parts) -> ApiResult<Response> {
    let method = &req.method;
    if method == Method::OPTIONS {
        return Ok((StatusCode::OK, [(ALLOW, ALLOWED_METHODS)]).into_response());
    }
    if method != Method::GET && method != Method::HEAD {
        return Err(ApiError::MethodNotAllowed(method.to_string()));
    }
    let head = method == Method::HEAD;

    let uri = &req.uri;
    if uri.path().ends_with("/index.html") {
        // Relative: `//host/index.html` must not redirect off-site.
        let location = match uri.query() {
            Some(query) => format!("./?{query}"),
            None => "./".to_string(),
        };
        return Ok((StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response());
    }

    let etag = format!("\"{tag}\"");
    if etag_matches(&req.headers, &etag) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL), (ETAG, etag.as_str())],
        )
            .into_response());
    }

    let accept_gzip = accepts_gzip(&req.headers);
    if let Some(rel) = decode_path(uri.path()) {
        for candidate in candidates(&rel) {
            if let Some(object) = state.artifacts.get(tag, &candidate).await? {
                return artifact_response(object, StatusCode::OK, head, accept_gzip, &etag).await;
            }
        }
    }

    match state.artifacts.get(tag, NOT_FOUND_PAGE).await? {
        Some(object) => {
            artifact_response(object, StatusCode::NOT_FOUND, head, accept_gzip, &etag).await
        }
        None => Err(ApiError::NotFound(uri.path().to_string())),
    }
}

/// Whether `If-None-Match` names `etag`, weakly or by wildcard.
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|candidate| {
            candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
        })
}

/// Decode a request path into an artifact path without its leading slash.
/// `None` for anything that is not plain segments.
fn decode_path(path: &str) -> Option<String> {
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let rel = decoded.trim_start_matches('/');
    let safe = !rel.contains(['\\', '\0'])
        && rel
            .split('/')
            .all(|segment| segment != "." && segment != "..");
    safe.then(|| rel.to_string())
}

/// Artifact paths to try for a request path, in order.
fn candidates(rel: &str) -> Vec<String> {
    if rel.is_empty() || rel.ends_with('/') {
        vec![format!("{rel}{INDEX}")]
    } else {
        vec![rel.to_string(), format!("{rel}/{INDEX}")]
    }
}

async fn artifact_response(
    object: StoredObject,
    status: StatusCode,
    head: bool,
    accept_gzip: bool,
    etag: &str,
) -> ApiResult<Response> {
    let content_type = object.entry.content_type.clone();
    let path = object.entry.path.clone();
    let negotiated = negotiate(object, accept_gzip)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to decode {path}: {e}")))?;

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, negotiated.body.len())
        .header(CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL)
        .header(ETAG, etag);
    if let Some(encoding) = negotiated.content_encoding {
        builder = builder.header(CONTENT_ENCODING, encoding);
    }
    if negotiated.vary {
        builder = builder.header(VARY, HeaderValue::from_static("Accept-Encoding"));
    }

    let body = if head {
        Body::empty()
    } else {
        Body::from(negotiated.body)
    };
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(format!("failed to build response for {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_matches() {
        let etag = "\"4b96fc2c15f95ad409edccb0ee01f307\"";
        let mut headers = HeaderMap::new();
        assert!(!etag_matches(&headers, etag));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"other\""));
        assert!(!etag_matches(&headers, etag));

        headers.insert(
            IF_NONE_MATCH,
            HeaderValue::from_static("\"other\", W/\"4b96fc2c15f95ad409edccb0ee01f307\""),
        );
        assert!(etag_matches(&headers, etag));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(etag_matches(&headers, etag));
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/").as_deref(), Some(""));
        assert_eq!(decode_path("/about/").as_deref(), Some("about/"));
        assert_eq!(decode_path("/a%20b.html").as_deref(), Some("a b.html"));
        assert_eq!(decode_path("/../etc/passwd"), None);
        assert_eq!(decode_path("/a/%2e%2e/b"), None);
        assert_eq!(decode_path("/a%5Cb"), None);
        assert_eq!(decode_path("/%ff"), None);
    }

    #[test]
    fn test_candidates() {
        assert_eq!(candidates(""), vec!["index.html"]);
        assert_eq!(candidates("blog/"), vec!["blog/index.html"]);
        assert_eq!(candidates("about"), vec!["about", "about/index.html"]);
        assert_eq!(candidates("css/site.css"), vec!["css/site.css", "css/site.css/index.html"]);
    }
}
