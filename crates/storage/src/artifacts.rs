//! Tag-addressed artifact storage.
//!
//! Files for a tag live under its shard prefix:
//!
//! ```text
//! <t0>/<t1>/<t2..>/<relative path>
//! ```
//!
//! The [`ArtifactSet`] manifest is written to `<t0>/<t1>/<t2..>.manifest.json`
//! only after every file is stored. Its presence is what makes a tag exist,
//! so a crash mid-store never exposes a partial set.

use crate::compression;
use crate::content_type;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectAttributes, ObjectStore};
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use sitehist_core::artifact::ENCODING_GZIP;
use sitehist_core::{ArtifactEntry, ArtifactSet, Tag};
use std::num::NonZeroUsize;
use std::path::{Component, Path};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

/// Cache-Control for everything under a tag: content never changes.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=315360000";

const MANIFEST_SUFFIX: &str = ".manifest.json";

const MANIFEST_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(4096) {
    Some(n) => n,
    None => unreachable!(),
};

/// One stored file and how to serve it.
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub entry: ArtifactEntry,
}

/// Artifact store over any [`ObjectStore`].
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    compress_min_size: u64,
    /// Only manifests that exist are cached; absence is always re-checked.
    manifests: Mutex<LruCache<Tag, Arc<ArtifactSet>>>,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>, compress_min_size: u64) -> Self {
        Self {
            store,
            compress_min_size,
            manifests: Mutex::new(LruCache::new(MANIFEST_CACHE_CAPACITY)),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn object_key(tag: &Tag, rel_path: &str) -> String {
        format!("{}/{}", tag.shard_path(), rel_path)
    }

    fn manifest_key(tag: &Tag) -> String {
        format!("{}{MANIFEST_SUFFIX}", tag.shard_path())
    }

    /// Whether a complete artifact set exists for `tag`.
    pub async fn exists(&self, tag: &Tag) -> StorageResult<bool> {
        if self.manifests.lock().contains(tag) {
            return Ok(true);
        }
        self.store.exists(&Self::manifest_key(tag)).await
    }

    /// Load the artifact set for `tag`, if the build completed.
    #[instrument(skip(self), fields(tag = %tag))]
    pub async fn manifest(&self, tag: &Tag) -> StorageResult<Option<Arc<ArtifactSet>>> {
        if let Some(set) = self.manifests.lock().get(tag) {
            return Ok(Some(set.clone()));
        }

        let raw = match self.store.get(&Self::manifest_key(tag)).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let set: ArtifactSet = serde_json::from_slice(&raw)?;
        if &set.tag != tag {
            return Err(StorageError::InvalidKey(format!(
                "manifest for {tag} names tag {}",
                set.tag
            )));
        }

        let set = Arc::new(set);
        self.manifests.lock().put(tag.clone(), set.clone());
        Ok(Some(set))
    }

    /// Store one file under `tag`.
    ///
    /// Files larger than the compression threshold are gzipped when that
    /// makes them smaller. The returned entry records what was stored.
    #[instrument(skip(self, data, content_type), fields(tag = %tag, size = data.len()))]
    pub async fn put(
        &self,
        tag: &Tag,
        rel_path: &str,
        data: Bytes,
        content_type: Option<&str>,
        mod_time: OffsetDateTime,
    ) -> StorageResult<ArtifactEntry> {
        validate_rel_path(rel_path)?;

        let content_type = match content_type {
            Some(ct) => ct.to_string(),
            None => content_type::detect(rel_path, &data),
        };
        let original_size = data.len() as u64;

        let (body, content_encoding) =
            match compression::maybe_gzip(&data, self.compress_min_size).await? {
                Some(compressed) => (Bytes::from(compressed), Some(ENCODING_GZIP.to_string())),
                None => (data, None),
            };

        let attributes = ObjectAttributes {
            content_type: Some(content_type.clone()),
            content_encoding: content_encoding.clone(),
            cache_control: Some(IMMUTABLE_CACHE_CONTROL.to_string()),
        };
        let size = body.len() as u64;
        self.store
            .put_with_attributes(&Self::object_key(tag, rel_path), body, &attributes)
            .await?;

        debug!(
            path = rel_path,
            original_size,
            stored_size = size,
            gzip = content_encoding.is_some(),
            "stored artifact"
        );

        Ok(ArtifactEntry {
            path: rel_path.to_string(),
            content_type,
            content_encoding,
            size,
            original_size,
            mod_time,
        })
    }

    /// Write the manifest, marking the set complete. Must run after every
    /// file of the set has been stored.
    #[instrument(skip(self, set), fields(tag = %set.tag, files = set.len()))]
    pub async fn commit(&self, set: &ArtifactSet) -> StorageResult<()> {
        let json = serde_json::to_vec(set)?;
        let attributes = ObjectAttributes {
            content_type: Some("application/json".to_string()),
            content_encoding: None,
            cache_control: None,
        };
        self.store
            .put_with_attributes(&Self::manifest_key(&set.tag), Bytes::from(json), &attributes)
            .await?;
        self.manifests
            .lock()
            .put(set.tag.clone(), Arc::new(set.clone()));
        Ok(())
    }

    /// Fetch a stored file. `None` if the tag is incomplete or the path is
    /// not part of its set.
    pub async fn get(&self, tag: &Tag, rel_path: &str) -> StorageResult<Option<StoredObject>> {
        let Some(set) = self.manifest(tag).await? else {
            return Ok(None);
        };
        let Some(entry) = set.get(rel_path) else {
            return Ok(None);
        };

        match self.store.get(&Self::object_key(tag, rel_path)).await {
            Ok(bytes) => Ok(Some(StoredObject {
                bytes,
                entry: entry.clone(),
            })),
            Err(e) if e.is_not_found() => {
                warn!(tag = %tag, path = rel_path, "manifest lists a missing object");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove objects left under `tag` by an interrupted store. Returns the
    /// number removed.
    #[instrument(skip(self), fields(tag = %tag))]
    pub async fn clear_partial(&self, tag: &Tag) -> StorageResult<usize> {
        let prefix = format!("{}/", tag.shard_path());
        let keys = self.store.list(&prefix).await?;
        for key in &keys {
            match self.store.delete(key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if !keys.is_empty() {
            warn!(removed = keys.len(), "removed objects from an incomplete build");
        }
        Ok(keys.len())
    }
}

/// Relative paths must be plain `/`-separated segments.
fn validate_rel_path(rel_path: &str) -> StorageResult<()> {
    let ok = !rel_path.is_empty()
        && !rel_path.starts_with('/')
        && !rel_path.contains('\\')
        && Path::new(rel_path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(format!(
            "invalid artifact path: {rel_path}"
        )))
    }
}
