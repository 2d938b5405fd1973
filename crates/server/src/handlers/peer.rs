//! Endpoint other nodes forward builds to.

use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sitehist_core::{BuildError, CacheKey};

/// GET {base_path}{key} - Build or look up a key on this node.
///
/// The key is the percent-encoded cache key wire form. Always served
/// locally; a forwarded request is never forwarded again. Failures carry
/// the [`BuildError`] itself so the caller can hand it on unchanged.
pub async fn peer_get(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let key = match CacheKey::decode(&raw) {
        Ok(key) => key,
        Err(e) => return build_error_response(e.into()),
    };

    match state.cache.get_local(&key).await {
        Ok(set) => Json(&*set).into_response(),
        Err(e) => {
            tracing::warn!(tag = %key.tag(), error = %e, "peer build failed");
            build_error_response(e)
        }
    }
}

fn build_error_response(err: BuildError) -> Response {
    let status =
        StatusCode::from_u16(err.status_hint()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}
