//! Application state shared across handlers.

use sitehist_cache::{BuildCache, Builder, PeerPicker};
use sitehist_core::config::AppConfig;
use sitehist_storage::ArtifactStore;
use std::sync::Arc;

/// The build cache as the server holds it.
pub type SiteCache = BuildCache<Arc<dyn Builder>>;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Where finished sites are read from.
    pub artifacts: Arc<ArtifactStore>,
    /// Memoizing build cache.
    pub cache: SiteCache,
}

impl AppState {
    /// Create application state.
    ///
    /// `builder` normally writes into `artifacts`; the artifact handler only
    /// ever reads from the store, so tags built elsewhere are served too.
    pub fn new(
        config: AppConfig,
        artifacts: Arc<ArtifactStore>,
        builder: Arc<dyn Builder>,
        peers: Option<PeerPicker>,
    ) -> Self {
        let cache = BuildCache::with_peers(builder, config.cache.max_weight_bytes, peers);
        Self {
            config: Arc::new(config),
            artifacts,
            cache,
        }
    }
}
