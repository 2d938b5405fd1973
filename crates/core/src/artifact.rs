//! Artifact set model.

use crate::key::{BuildKey, Tag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Content encoding recorded for gzip-compressed objects.
pub const ENCODING_GZIP: &str = "gzip";

/// Metadata for one rendered file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Path relative to the site root, `/`-separated, no leading slash.
    pub path: String,
    pub content_type: String,
    /// `Some("gzip")` when the stored bytes are compressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    /// Size of the stored bytes.
    pub size: u64,
    /// Size of the file as generated.
    pub original_size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub mod_time: OffsetDateTime,
}

impl ArtifactEntry {
    pub fn is_gzip(&self) -> bool {
        self.content_encoding.as_deref() == Some(ENCODING_GZIP)
    }
}

/// The immutable output of one successful build.
///
/// File bytes live in the artifact store; the set carries what is needed to
/// serve them. Once written for a tag it is never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub tag: Tag,
    pub key: BuildKey,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub files: BTreeMap<String, ArtifactEntry>,
}

impl ArtifactSet {
    pub fn new(tag: Tag, key: BuildKey) -> Self {
        Self {
            tag,
            key,
            created_at: OffsetDateTime::now_utc(),
            files: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, entry: ArtifactEntry) {
        self.files.insert(entry.path.clone(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&ArtifactEntry> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Stored bytes across all files.
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|e| e.size).sum()
    }

    /// Approximate in-memory footprint, used to weigh sets in the fast-path
    /// cache.
    pub fn weight(&self) -> u64 {
        let fixed = 128 + self.key.owner.len() + self.key.repo.len() + self.key.reference.len();
        let per_file: usize = self
            .files
            .values()
            .map(|e| 96 + 2 * e.path.len() + e.content_type.len())
            .sum();
        (fixed + per_file) as u64
    }
}
