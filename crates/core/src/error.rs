//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid build key: {0}")]
    InvalidBuildKey(String),

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("invalid cache key: {0}")]
    InvalidCacheKey(String),

    #[error("tag mismatch: expected {expected}, got {actual}")]
    TagMismatch { expected: String, actual: String },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
