//! Site builds for sitehist.
//!
//! A build fetches the source archive for a build key, runs the static-site
//! generator over it and stores the output in the artifact store. The
//! [`SitePipeline`] ties the three steps together behind the cache's
//! [`Builder`](sitehist_cache::Builder) trait.

pub mod archive;
pub mod error;
pub mod executor;
pub mod pipeline;

pub use archive::{ArchiveSource, ExtractSummary, HttpArchiveSource, extract_tar, extract_tar_gz};
pub use error::{ArchiveError, ExecutorError};
pub use executor::{CommandExecutor, ContainerExecutor, Executor};
pub use pipeline::SitePipeline;
