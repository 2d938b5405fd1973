//! Cache counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters describing cache behaviour.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub(crate) gets: AtomicU64,
    pub(crate) memory_hits: AtomicU64,
    pub(crate) store_hits: AtomicU64,
    pub(crate) coalesced: AtomicU64,
    pub(crate) local_builds: AtomicU64,
    pub(crate) peer_forwards: AtomicU64,
    pub(crate) peer_errors: AtomicU64,
    pub(crate) failures: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub gets: u64,
    pub memory_hits: u64,
    pub store_hits: u64,
    pub coalesced: u64,
    pub local_builds: u64,
    pub peer_forwards: u64,
    pub peer_errors: u64,
    pub failures: u64,
    pub memory_entries: u64,
    pub memory_weight: u64,
}

impl CacheStats {
    pub(crate) fn snapshot(&self, memory_entries: u64, memory_weight: u64) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            local_builds: self.local_builds.load(Ordering::Relaxed),
            peer_forwards: self.peer_forwards.load(Ordering::Relaxed),
            peer_errors: self.peer_errors.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            memory_entries,
            memory_weight,
        }
    }
}
