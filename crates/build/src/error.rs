//! Build pipeline error types.
//!
//! Each converts into exactly one [`ErrorKind`](sitehist_core::ErrorKind)
//! through its `From` impl for [`BuildError`].

use sitehist_core::BuildError;
use std::time::Duration;
use thiserror::Error;

/// Failure fetching or materializing a source archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Upstream says the repository or ref does not exist.
    #[error("archive not found: {0}")]
    NotFound(String),

    /// Transport, HTTP status, decompression or tar framing failure.
    #[error("archive fetch failed: {0}")]
    Upstream(String),

    /// An entry would land outside the destination directory.
    #[error("unsafe path in archive: {0}")]
    UnsafePath(String),

    /// Local filesystem failure while writing the tree.
    #[error("I/O error extracting archive: {0}")]
    Io(#[source] std::io::Error),
}

impl From<ArchiveError> for BuildError {
    fn from(err: ArchiveError) -> Self {
        match &err {
            ArchiveError::NotFound(_) => BuildError::upstream_not_found(err.to_string()),
            ArchiveError::Upstream(_) => BuildError::upstream_unavailable(err.to_string()),
            ArchiveError::UnsafePath(_) => BuildError::build_failed(err.to_string()),
            ArchiveError::Io(_) => BuildError::local_io(err.to_string()),
        }
    }
}

/// Failure running the site generator.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("I/O error running generator: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecutorError> for BuildError {
    fn from(err: ExecutorError) -> Self {
        match &err {
            ExecutorError::ExitStatus { .. } | ExecutorError::Timeout { .. } => {
                BuildError::build_failed(err.to_string())
            }
            ExecutorError::Spawn { .. } | ExecutorError::Io(_) => {
                BuildError::local_io(err.to_string())
            }
        }
    }
}
