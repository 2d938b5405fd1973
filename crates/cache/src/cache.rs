//! The memoizing, coalescing build cache.
//!
//! A lookup walks three tiers: the in-memory [`WeightedLru`], then the
//! builder's durable store, then an actual build (here or on the owning
//! peer). Concurrent callers for one key share a single in-flight load.
//! Loads run on their own task, so a caller that disconnects never cancels
//! a build other callers are waiting on.

use crate::builder::Builder;
use crate::fast_path::WeightedLru;
use crate::peer::{PeerClient, PeerError, PeerPicker};
use crate::stats::{CacheStats, CacheStatsSnapshot, bump};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use sitehist_core::{ArtifactSet, BuildError, BuildResult, CacheKey, Tag};
use std::sync::Arc;
use tracing::{debug, info, warn};

type SharedLoad = Shared<BoxFuture<'static, BuildResult<Arc<ArtifactSet>>>>;

/// In-flight loads are keyed by tag and by whether the load goes to a
/// remote owner. On the owning node every caller shares one local load; a
/// request forwarded from a peer never waits on a load forwarding to it.
type FlightKey = (Tag, bool);

/// Coalescing cache in front of a [`Builder`].
pub struct BuildCache<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for BuildCache<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B> {
    builder: B,
    memory: Mutex<WeightedLru>,
    inflight: DashMap<FlightKey, SharedLoad>,
    peers: Option<PeerPicker>,
    stats: CacheStats,
}

/// Removes the in-flight entry when the load task ends, panics included.
struct FlightGuard<'a, B> {
    inner: &'a Inner<B>,
    key: Option<FlightKey>,
}

impl<B> Drop for FlightGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.inflight.remove(&key);
        }
    }
}

impl<B: Builder> BuildCache<B> {
    /// Single-node cache.
    pub fn new(builder: B, max_weight_bytes: u64) -> Self {
        Self::with_peers(builder, max_weight_bytes, None)
    }

    /// Cache that forwards keys owned by other nodes.
    pub fn with_peers(builder: B, max_weight_bytes: u64, peers: Option<PeerPicker>) -> Self {
        Self {
            inner: Arc::new(Inner {
                builder,
                memory: Mutex::new(WeightedLru::new(max_weight_bytes)),
                inflight: DashMap::new(),
                peers,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Artifact set for `key`, forwarding to the owning peer if needed.
    pub async fn get(&self, key: &CacheKey) -> BuildResult<Arc<ArtifactSet>> {
        self.load(key, true).await
    }

    /// Artifact set for `key`, never forwarding. Used to answer peers.
    pub async fn get_local(&self, key: &CacheKey) -> BuildResult<Arc<ArtifactSet>> {
        self.load(key, false).await
    }

    pub fn builder(&self) -> &B {
        &self.inner.builder
    }

    pub fn peers(&self) -> Option<&PeerPicker> {
        self.inner.peers.as_ref()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let memory = self.inner.memory.lock();
        self.inner
            .stats
            .snapshot(memory.len() as u64, memory.weight())
    }

    async fn load(&self, key: &CacheKey, forward: bool) -> BuildResult<Arc<ArtifactSet>> {
        let stats = &self.inner.stats;
        bump(&stats.gets);

        if let Some(set) = self.inner.memory.lock().get(key.tag()) {
            bump(&stats.memory_hits);
            return Ok(set);
        }

        let owner = if forward {
            self.inner.peers.as_ref().and_then(|p| p.pick(key.tag()))
        } else {
            None
        };
        let remote = owner.is_some();

        let load = match self.inner.inflight.entry((key.tag().clone(), remote)) {
            Entry::Occupied(entry) => {
                bump(&stats.coalesced);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // A load may have finished between the memory check and here.
                if let Some(set) = self.inner.memory.lock().get(key.tag()) {
                    bump(&stats.memory_hits);
                    return Ok(set);
                }

                let inner = Arc::clone(&self.inner);
                let owned_key = key.clone();
                let handle = tokio::spawn(async move {
                    let _guard = FlightGuard {
                        inner: &inner,
                        key: Some((owned_key.tag().clone(), remote)),
                    };
                    inner.run(&owned_key, owner).await
                });
                let load = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(BuildError::local_io(format!("build task failed: {e}")))
                    })
                }
                .boxed()
                .shared();
                entry.insert(load.clone());
                load
            }
        };

        load.await
    }
}

impl<B: Builder> Inner<B> {
    async fn run(
        &self,
        key: &CacheKey,
        owner: Option<Arc<dyn PeerClient>>,
    ) -> BuildResult<Arc<ArtifactSet>> {
        match self.resolve(key, owner).await {
            Ok(set) => {
                let set = Arc::new(set);
                self.memory.lock().insert(key.tag().clone(), Arc::clone(&set));
                Ok(set)
            }
            Err(err) => {
                bump(&self.stats.failures);
                warn!(tag = %key.tag(), key = %key.build_key(), error = %err, "build failed");
                Err(err)
            }
        }
    }

    async fn resolve(
        &self,
        key: &CacheKey,
        owner: Option<Arc<dyn PeerClient>>,
    ) -> BuildResult<ArtifactSet> {
        if let Some(set) = self.builder.lookup(key).await? {
            bump(&self.stats.store_hits);
            debug!(tag = %key.tag(), "artifact set found in store");
            return Ok(set);
        }

        if let Some(peer) = owner {
            bump(&self.stats.peer_forwards);
            match peer.fetch(key).await {
                Ok(set) => return Ok(set),
                Err(PeerError::Remote(err)) => return Err(err),
                Err(PeerError::Transport(msg)) => {
                    bump(&self.stats.peer_errors);
                    warn!(
                        tag = %key.tag(),
                        peer = %peer.url(),
                        error = %msg,
                        "peer unavailable, building locally"
                    );
                }
            }
        }

        bump(&self.stats.local_builds);
        info!(tag = %key.tag(), key = %key.build_key(), "building");
        self.builder.build(key).await
    }
}
