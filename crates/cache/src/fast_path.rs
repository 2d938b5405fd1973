//! Weight-bounded LRU table in front of the durable store.
//!
//! Eviction only drops the in-memory copy; stored artifacts are untouched.

use lru::LruCache;
use sitehist_core::{ArtifactSet, Tag};
use std::sync::Arc;

pub struct WeightedLru {
    entries: LruCache<Tag, (Arc<ArtifactSet>, u64)>,
    weight: u64,
    max_weight: u64,
}

impl WeightedLru {
    pub fn new(max_weight: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            weight: 0,
            max_weight,
        }
    }

    pub fn get(&mut self, tag: &Tag) -> Option<Arc<ArtifactSet>> {
        self.entries.get(tag).map(|(set, _)| set.clone())
    }

    /// Insert, then evict least-recently-used entries until within budget.
    /// A single set heavier than the whole budget is not kept.
    pub fn insert(&mut self, tag: Tag, set: Arc<ArtifactSet>) {
        let weight = set.weight();
        if weight > self.max_weight {
            return;
        }
        if let Some((_, old)) = self.entries.put(tag, (set, weight)) {
            self.weight -= old;
        }
        self.weight += weight;
        while self.weight > self.max_weight {
            match self.entries.pop_lru() {
                Some((_, (_, w))) => self.weight -= w,
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }
}
