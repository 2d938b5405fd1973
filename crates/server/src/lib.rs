//! HTTP front end for sitehist.
//!
//! This crate provides:
//! - Build redirects: `/u/{user}/r/{repo}/c/{commit}/b/...` to the tag host
//! - Virtual-host artifact serving on `<tag>.<domain>`
//! - The peer endpoint other nodes forward builds to
//! - Health and Prometheus metrics

pub mod compression;
pub mod error;
pub mod handlers;
pub mod host;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use host::HostKind;
pub use routes::create_router;
pub use state::AppState;
