//! Route configuration.

use crate::error::ApiError;
use crate::handlers;
use crate::host::{self, HostKind};
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::SERVER;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Health check path, answered on the service host and unknown hosts.
pub const HEALTH_PATH: &str = "/v1/health";

const SERVER_NAME: &str = concat!("sitehist/", env!("CARGO_PKG_VERSION"));

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let peer_route = format!("{}{{key}}", state.config.peers.base_path);

    let build_routes = Router::new()
        .route(
            "/u/{user}/r/{repo}/c/{commit}/b",
            get(handlers::build_redirect),
        )
        .route(
            "/u/{user}/r/{repo}/c/{commit}/b/",
            get(handlers::build_redirect),
        )
        .route(
            "/u/{user}/r/{repo}/c/{commit}/b/{*path}",
            get(handlers::build_redirect),
        );

    let shared_routes = Router::new()
        // Health check (any host, for load balancers)
        .route(HEALTH_PATH, get(handlers::health_check))
        // Builds forwarded by peers (any host)
        .route(&peer_route, get(handlers::peer_get));

    let mut router = Router::new().merge(build_routes).merge(shared_routes);

    // Conditionally add metrics endpoint based on config.
    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    // Middleware layers are applied in reverse order (outermost first).
    // Order of execution: TraceLayer -> Server header -> Host dispatch -> Handler
    router
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), host_dispatch))
        .layer(middleware::map_response(server_header))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Route a request by its Host header.
///
/// Tag hosts are answered by the artifact handler whatever the path; the
/// service host falls through to the routes above. Other hosts only reach
/// the health check and the peer endpoint, since peers address nodes by URL.
async fn host_dispatch(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let kind = host::classify(host::request_host(&req), &state.config.server.domain);
    match kind {
        HostKind::Site(tag) => handlers::serve_site(&state, &tag, req).await,
        HostKind::App => next.run(req).await,
        HostKind::Foreign if is_shared_path(&state, req.uri().path()) => next.run(req).await,
        HostKind::Foreign => {
            tracing::debug!(host = ?host::request_host(&req), "refusing unknown host");
            ApiError::Forbidden("unknown host".to_string()).into_response()
        }
    }
}

fn is_shared_path(state: &AppState, path: &str) -> bool {
    path == HEALTH_PATH || path.starts_with(state.config.peers.base_path.as_str())
}

async fn server_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    response
}
