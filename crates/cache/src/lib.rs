//! Memoizing build cache for sitehist.
//!
//! [`BuildCache`] returns the [`ArtifactSet`](sitehist_core::ArtifactSet) for
//! a cache key, running the [`Builder`] at most once per key no matter how
//! many callers ask concurrently. In a fleet, each key is owned by one peer
//! chosen on a consistent-hash ring, and non-owners forward to it.

pub mod builder;
pub mod cache;
pub mod fast_path;
pub mod peer;
pub mod ring;
pub mod stats;

pub use builder::Builder;
pub use cache::BuildCache;
pub use peer::{HttpPeer, PeerClient, PeerError, PeerPicker, PickerError};
pub use ring::HashRing;
pub use stats::{CacheStats, CacheStatsSnapshot};
