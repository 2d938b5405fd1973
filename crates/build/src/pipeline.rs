//! The fetch, generate and store pipeline behind the build cache.
//!
//! Each tag gets a private working tree at `<work_dir>/<shard path>` with
//! `repo/` (extracted source) and `site/` (generator output). The tree is
//! removed after the build unless `keep_working_dirs` is set.

use crate::archive::{ArchiveSource, HttpArchiveSource};
use crate::error::ArchiveError;
use crate::executor::{self, Executor};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use sitehist_cache::Builder;
use sitehist_core::config::BuildConfig;
use sitehist_core::{ArtifactSet, BuildError, BuildResult, CacheKey, Tag};
use sitehist_storage::ArtifactStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const PUT_CONCURRENCY: usize = 8;

/// [`Builder`] that renders a repository snapshot into the artifact store.
pub struct SitePipeline {
    source: Arc<dyn ArchiveSource>,
    executor: Arc<dyn Executor>,
    store: Arc<ArtifactStore>,
    work_dir: PathBuf,
    keep_working_dirs: bool,
}

/// A generated file waiting to be stored.
struct SiteFile {
    rel_path: String,
    path: PathBuf,
    modified: SystemTime,
}

impl SitePipeline {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        executor: Arc<dyn Executor>,
        store: Arc<ArtifactStore>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            executor,
            store,
            work_dir: work_dir.into(),
            keep_working_dirs: false,
        }
    }

    pub fn keep_working_dirs(mut self, keep: bool) -> Self {
        self.keep_working_dirs = keep;
        self
    }

    /// Pipeline with an HTTP archive source and the configured generator.
    pub fn from_config(config: &BuildConfig, store: Arc<ArtifactStore>) -> Result<Self, ArchiveError> {
        let source = HttpArchiveSource::new(&config.archive)?;
        let executor = executor::from_config(&config.generator, config.timeout());
        Ok(Self::new(Arc::new(source), executor, store, config.work_dir.clone())
            .keep_working_dirs(config.keep_working_dirs))
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn working_dir(&self, tag: &Tag) -> PathBuf {
        self.work_dir.join(tag.shard_path())
    }

    async fn run(&self, key: &CacheKey, base: &Path) -> BuildResult<ArtifactSet> {
        let tag = key.tag();
        let repo = base.join("repo");
        let site = base.join("site");

        tokio::fs::create_dir_all(base)
            .await
            .map_err(|e| BuildError::local_io(format!("creating {}: {e}", base.display())))?;

        self.store.clear_partial(tag).await?;

        self.source.fetch_and_extract(key.build_key(), &repo).await?;

        let started = Instant::now();
        self.executor.build(&repo, &site).await?;
        debug!(
            tag = %tag,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generator finished"
        );

        let set = self.store_site(key, &site).await?;
        self.store.commit(&set).await?;
        Ok(set)
    }

    /// Store every file under `site` and return the resulting set.
    async fn store_site(&self, key: &CacheKey, site: &Path) -> BuildResult<ArtifactSet> {
        let root = site.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_site_files(&root))
            .await
            .map_err(|e| BuildError::local_io(format!("walking site failed: {e}")))??;
        if files.is_empty() {
            return Err(BuildError::build_failed("generator produced no files"));
        }

        let tag = key.tag();
        let entries: Vec<_> = futures::stream::iter(files)
            .map(|file| async move {
                let data = tokio::fs::read(&file.path).await.map_err(|e| {
                    BuildError::local_io(format!("reading {}: {e}", file.path.display()))
                })?;
                let entry = self
                    .store
                    .put(
                        tag,
                        &file.rel_path,
                        Bytes::from(data),
                        None,
                        OffsetDateTime::from(file.modified),
                    )
                    .await?;
                Ok::<_, BuildError>(entry)
            })
            .buffer_unordered(PUT_CONCURRENCY)
            .try_collect()
            .await?;

        let mut set = ArtifactSet::new(tag.clone(), key.build_key().clone());
        for entry in entries {
            set.insert(entry);
        }
        Ok(set)
    }
}

#[async_trait]
impl Builder for SitePipeline {
    async fn lookup(&self, key: &CacheKey) -> BuildResult<Option<ArtifactSet>> {
        Ok(self
            .store
            .manifest(key.tag())
            .await?
            .map(|set| ArtifactSet::clone(&set)))
    }

    async fn build(&self, key: &CacheKey) -> BuildResult<ArtifactSet> {
        let base = self.working_dir(key.tag());
        if remove_tree(&base).await? {
            warn!(tag = %key.tag(), path = %base.display(), "removed stale working tree");
        }

        let started = Instant::now();
        let result = self.run(key, &base).await;

        if !self.keep_working_dirs
            && let Err(e) = remove_tree(&base).await
        {
            warn!(tag = %key.tag(), error = %e, "failed to remove working tree");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let build_key = key.build_key();
        match &result {
            Ok(set) => info!(
                tag = %key.tag(),
                owner = %build_key.owner,
                repo = %build_key.repo,
                reference = %build_key.reference,
                files = set.len(),
                bytes = set.total_size(),
                elapsed_ms,
                "site built"
            ),
            Err(err) => warn!(
                tag = %key.tag(),
                owner = %build_key.owner,
                repo = %build_key.repo,
                reference = %build_key.reference,
                kind = %err.kind,
                elapsed_ms,
                error = %err.message,
                "site build failed"
            ),
        }
        result
    }
}

/// Remove a directory tree. `Ok(false)` if it did not exist.
async fn remove_tree(path: &Path) -> BuildResult<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::local_io(format!(
            "removing {}: {e}",
            path.display()
        ))),
    }
}

/// Every regular file under `root`, sorted by relative path. Anything that
/// is neither a file nor a directory fails the build.
fn collect_site_files(root: &Path) -> BuildResult<Vec<SiteFile>> {
    let io = |path: &Path, e: std::io::Error| {
        BuildError::local_io(format!("reading {}: {e}", path.display()))
    };

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound && dir == root => return Ok(files),
            Err(e) => return Err(io(&dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io(&path, e))?;

            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .map_err(|e| io(&path, e))?;
                files.push(SiteFile {
                    rel_path: relative_key(root, &path)?,
                    path,
                    modified,
                });
            } else {
                return Err(BuildError::build_failed(format!(
                    "generator output {} is not a regular file",
                    path.display()
                )));
            }
        }
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn relative_key(root: &Path, path: &Path) -> BuildResult<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| BuildError::local_io(format!("{} is outside the site", path.display())))?;
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            BuildError::build_failed(format!("non UTF-8 file name in output: {}", rel.display()))
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}
