//! Core domain types and shared logic for sitehist.
//!
//! This crate defines the data model used across all other crates:
//! - Build keys and the tags derived from them
//! - The cache key wire format carried between peers
//! - Artifact sets produced by a successful build
//! - The build failure taxonomy and its HTTP status hints
//! - Configuration types

pub mod artifact;
pub mod config;
pub mod error;
pub mod key;
pub mod outcome;

pub use artifact::{ArtifactEntry, ArtifactSet};
pub use error::{Error, Result};
pub use key::{BuildKey, CacheKey, Tag, derive_tag};
pub use outcome::{BuildError, BuildResult, ErrorKind};

/// Gzip is only attempted for files larger than this many bytes.
pub const DEFAULT_COMPRESS_MIN_SIZE: u64 = 1024;

/// Default budget for the in-memory fast-path cache: 1 MiB.
pub const DEFAULT_CACHE_WEIGHT_BYTES: u64 = 1 << 20;
