//! The capability the cache memoizes.

use async_trait::async_trait;
use sitehist_core::{ArtifactSet, BuildResult, CacheKey};
use std::sync::Arc;

/// Produces the artifact set for a key.
#[async_trait]
pub trait Builder: Send + Sync + 'static {
    /// Return an already-stored set without building, if there is one.
    async fn lookup(&self, key: &CacheKey) -> BuildResult<Option<ArtifactSet>> {
        let _ = key;
        Ok(None)
    }

    /// Build and store the set for `key`.
    async fn build(&self, key: &CacheKey) -> BuildResult<ArtifactSet>;
}

#[async_trait]
impl<T: Builder + ?Sized> Builder for Arc<T> {
    async fn lookup(&self, key: &CacheKey) -> BuildResult<Option<ArtifactSet>> {
        (**self).lookup(key).await
    }

    async fn build(&self, key: &CacheKey) -> BuildResult<ArtifactSet> {
        (**self).build(key).await
    }
}
