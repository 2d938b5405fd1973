//! Object storage abstraction and the artifact store for sitehist.
//!
//! This crate provides:
//! - A narrow get/put/head/list object store trait
//! - Backends: local filesystem and S3-compatible
//! - Tag-sharded artifact storage with gzip and a completion manifest

pub mod artifacts;
pub mod backends;
pub mod compression;
pub mod content_type;
pub mod error;
pub mod traits;

pub use artifacts::{ArtifactStore, IMMUTABLE_CACHE_CONTROL, StoredObject};
pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectAttributes, ObjectMeta, ObjectStore};

use sitehist_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
