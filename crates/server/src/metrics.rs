//! Prometheus metrics for the sitehist server.
//!
//! Build cache counters live in the cache itself as plain atomics; on every
//! scrape the Prometheus counters are advanced to match them. Request-path metrics are updated
//! directly by the handlers.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! It exposes no tags or repository names, only aggregate counts, but it
//! should still be network-restricted to the scraper at the infrastructure
//! level.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use sitehist_cache::CacheStatsSnapshot;
use std::sync::{LazyLock, Mutex, Once, PoisonError};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Build cache metrics
pub static CACHE_EVENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitehist_cache_events_total",
            "Build cache events since start, by event",
        ),
        &["event"],
    )
    .expect("metric creation failed")
});

pub static CACHE_MEMORY_ENTRIES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "sitehist_cache_memory_entries",
        "Artifact sets held in the in-memory fast path",
    )
    .expect("metric creation failed")
});

pub static CACHE_MEMORY_BYTES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "sitehist_cache_memory_bytes",
        "Weight of artifact sets held in the in-memory fast path",
    )
    .expect("metric creation failed")
});

// Request metrics
pub static ARTIFACT_RESPONSES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitehist_artifact_responses_total",
            "Responses served on artifact hosts, by status code",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

pub static BUILD_REDIRECTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitehist_build_requests_total",
            "Build redirect requests, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static BUILD_REQUEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "sitehist_build_request_duration_seconds",
            "Time from build request to redirect, including any build",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 600.0]),
    )
    .expect("metric creation failed")
});

/// Serializes scrapes while they advance the cache event counters.
static CACHE_EVENTS_SYNC: Mutex<()> = Mutex::new(());

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CACHE_EVENTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_MEMORY_ENTRIES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_MEMORY_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARTIFACT_RESPONSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BUILD_REDIRECTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BUILD_REQUEST_DURATION.clone()))
            .expect("metric registration failed");
    });
}

fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Bring the cache metrics up to a statistics snapshot.
///
/// Event counters only move forward; a snapshot behind the exported value
/// leaves it unchanged.
pub fn record_cache_stats(stats: &CacheStatsSnapshot) {
    let events = [
        ("gets", stats.gets),
        ("memory_hits", stats.memory_hits),
        ("store_hits", stats.store_hits),
        ("coalesced", stats.coalesced),
        ("local_builds", stats.local_builds),
        ("peer_forwards", stats.peer_forwards),
        ("peer_errors", stats.peer_errors),
        ("failures", stats.failures),
    ];
    let _sync = CACHE_EVENTS_SYNC
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    for (event, value) in events {
        let counter = CACHE_EVENTS.with_label_values(&[event]);
        let current = counter.get();
        if value > current {
            counter.inc_by(value - current);
        }
    }
    CACHE_MEMORY_ENTRIES.set(gauge_value(stats.memory_entries));
    CACHE_MEMORY_BYTES.set(gauge_value(stats.memory_weight));
}

/// Count one artifact-host response.
pub fn record_artifact_response(status: StatusCode) {
    ARTIFACT_RESPONSES
        .with_label_values(&[status.as_str()])
        .inc();
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_cache_stats(&state.cache.stats());

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
