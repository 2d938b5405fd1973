//! Build failure taxonomy.
//!
//! A [`BuildError`] is the only failure value that crosses the build cache
//! and the peer wire. Every component error is classified into exactly one
//! [`ErrorKind`] at the boundary that produced it; the HTTP layer switches on
//! the kind and never inspects the original error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed build or request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed key or path.
    InvalidRequest,
    /// The source commit or its archive does not exist upstream.
    UpstreamNotFound,
    /// The source fetch failed in transport or upstream returned an error.
    UpstreamUnavailable,
    /// Local disk or artifact store failure.
    LocalIo,
    /// The external generator exited unsuccessfully or produced an unusable tree.
    BuildFailed,
    /// The host or mode is not permitted.
    Forbidden,
    /// The HTTP method is not permitted.
    MethodNotAllowed,
}

impl ErrorKind {
    /// HTTP status code this kind maps to.
    pub fn status_hint(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::UpstreamNotFound => 404,
            Self::UpstreamUnavailable => 502,
            Self::LocalIo => 500,
            Self::BuildFailed => 500,
            Self::Forbidden => 403,
            Self::MethodNotAllowed => 405,
        }
    }

    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UpstreamNotFound => "upstream_not_found",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::LocalIo => "local_io",
            Self::BuildFailed => "build_failed",
            Self::Forbidden => "forbidden",
            Self::MethodNotAllowed => "method_not_allowed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified build failure.
///
/// Cloneable so one failure can be handed to every waiter on a coalesced
/// build, and serializable so it survives a hop between peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BuildError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BuildError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn upstream_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamNotFound, message)
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    pub fn local_io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LocalIo, message)
    }

    pub fn build_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BuildFailed, message)
    }

    pub fn status_hint(&self) -> u16 {
        self.kind.status_hint()
    }
}

impl From<crate::Error> for BuildError {
    fn from(err: crate::Error) -> Self {
        Self::invalid_request(err.to_string())
    }
}

/// Result of one build attempt.
pub type BuildResult<T> = std::result::Result<T, BuildError>;
