//! Build redirect endpoint.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, LOCATION};
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use sitehist_core::{BuildKey, CacheKey};
use std::time::Instant;

/// Segments before the site path in `/u/{user}/r/{repo}/c/{commit}/b/...`,
/// counting the empty one before the leading slash.
const PREFIX_SEGMENTS: usize = 8;

#[derive(Debug, Deserialize)]
pub struct BuildParams {
    user: String,
    repo: String,
    commit: String,
}

/// GET /u/{user}/r/{repo}/c/{commit}/b[/{*path}] - Build if needed, then
/// redirect to the same path on the tag's host.
///
/// Responses are never cached: the redirect target is stable but the build
/// behind it may fail transiently.
pub async fn build_redirect(
    State(state): State<AppState>,
    Path(params): Path<BuildParams>,
    uri: Uri,
) -> Response {
    let started = Instant::now();
    let result = redirect_location(&state, &params, &uri).await;
    metrics::BUILD_REQUEST_DURATION.observe(started.elapsed().as_secs_f64());

    let mut response = match result {
        Ok(location) => {
            metrics::BUILD_REDIRECTS.with_label_values(&["redirect"]).inc();
            (StatusCode::FOUND, [(LOCATION, location)]).into_response()
        }
        Err(e) => {
            metrics::BUILD_REDIRECTS.with_label_values(&[e.code()]).inc();
            tracing::warn!(
                owner = %params.user,
                repo = %params.repo,
                reference = %params.commit,
                error = %e,
                "build request failed"
            );
            e.into_response()
        }
    };
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    response
}

async fn redirect_location(
    state: &AppState,
    params: &BuildParams,
    uri: &Uri,
) -> ApiResult<HeaderValue> {
    let key = CacheKey::new(BuildKey::parse(&params.user, &params.repo, &params.commit)?);
    let set = state.cache.get(&key).await?;

    let server = &state.config.server;
    let mut location = format!(
        "{}://{}.{}/{}",
        server.redirect_scheme,
        set.tag,
        server.domain,
        site_path(uri.path())
    );
    if let Some(query) = uri.query() {
        location.push('?');
        location.push_str(query);
    }
    HeaderValue::from_str(&location)
        .map_err(|e| ApiError::Internal(format!("invalid redirect location: {e}")))
}

/// The still-encoded site path following `/b/`, without its leading slash.
fn site_path(raw_path: &str) -> &str {
    raw_path
        .splitn(PREFIX_SEGMENTS + 1, '/')
        .nth(PREFIX_SEGMENTS)
        .unwrap_or_default()
}
