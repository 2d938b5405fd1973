//! Source archive fetch and extraction.
//!
//! The archive is a gzip tarball with one synthetic root directory. It is
//! streamed straight from the HTTP body into the tar reader on the blocking
//! pool; nothing is buffered whole in memory.
//!
//! Only plain files and directories are materialized. Links, devices and
//! fifos are skipped, and any entry whose path would leave the destination
//! aborts the extraction.

use crate::error::ArchiveError;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::{StreamExt, TryStreamExt};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sitehist_core::BuildKey;
use sitehist_core::config::ArchiveConfig;
use std::fs::{self, File, FileTimes, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, warn};

const COPY_BUF_LEN: usize = 64 * 1024;

/// Characters left unescaped in owner and repo path segments.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Refs such as `refs/heads/main` keep their slashes.
const REF: &AsciiSet = &SEGMENT.remove(b'/');

/// What an extraction produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub dirs: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// Produces the source tree for a build key.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetch the archive for `key` and extract it into `dest`.
    async fn fetch_and_extract(
        &self,
        key: &BuildKey,
        dest: &Path,
    ) -> Result<ExtractSummary, ArchiveError>;
}

/// Tarballs from a GitHub-compatible REST API.
pub struct HttpArchiveSource {
    client: reqwest::Client,
    api_base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpArchiveSource")
            .field("api_base_url", &self.api_base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpArchiveSource {
    pub fn new(config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .build()
            .map_err(|e| ArchiveError::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// `{api}/repos/{owner}/{repo}/tarball/{ref}`
    pub fn tarball_url(&self, key: &BuildKey) -> String {
        format!(
            "{}/repos/{}/{}/tarball/{}",
            self.api_base_url,
            utf8_percent_encode(&key.owner, SEGMENT),
            utf8_percent_encode(&key.repo, SEGMENT),
            utf8_percent_encode(&key.reference, REF),
        )
    }

    /// Stream the tarball at `url` into `dest`.
    pub async fn fetch_url(&self, url: &str, dest: &Path) -> Result<ExtractSummary, ArchiveError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ArchiveError::Upstream(format!("GET {url}: {e}")))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ArchiveError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ArchiveError::Upstream(format!("GET {url}: status {status}")));
        }

        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        let reader = SyncIoBridge::new(StreamReader::new(body));
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || extract_tar_gz(reader, &dest))
            .await
            .map_err(|e| ArchiveError::Io(std::io::Error::other(format!("extraction task failed: {e}"))))?
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch_and_extract(
        &self,
        key: &BuildKey,
        dest: &Path,
    ) -> Result<ExtractSummary, ArchiveError> {
        let url = self.tarball_url(key);
        debug!(url = %url, "fetching source archive");
        let summary = self.fetch_url(&url, dest).await?;
        info!(
            key = %key,
            files = summary.files,
            dirs = summary.dirs,
            skipped = summary.skipped,
            bytes = summary.bytes,
            "extracted source archive"
        );
        Ok(summary)
    }
}

fn upstream(err: std::io::Error) -> ArchiveError {
    ArchiveError::Upstream(format!("reading archive: {err}"))
}

/// Extract a gzip-compressed tarball.
pub fn extract_tar_gz<R: Read>(reader: R, dest: &Path) -> Result<ExtractSummary, ArchiveError> {
    extract_tar(GzDecoder::new(reader), dest)
}

/// Extract an uncompressed tarball, dropping the first path component of
/// every entry.
pub fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<ExtractSummary, ArchiveError> {
    fs::create_dir_all(dest).map_err(ArchiveError::Io)?;

    let mut archive = tar::Archive::new(reader);
    let mut summary = ExtractSummary::default();

    for entry in archive.entries().map_err(upstream)? {
        let mut entry = entry.map_err(upstream)?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_pax_global_extensions()
            || entry_type.is_pax_local_extensions()
            || entry_type.is_gnu_longname()
            || entry_type.is_gnu_longlink()
        {
            continue;
        }

        let path = entry.path().map_err(upstream)?.into_owned();
        let Some(rel) = strip_root(&path)? else {
            continue;
        };
        let target = dest.join(&rel);
        let mode = entry.header().mode().map_err(upstream)? & 0o777;

        if entry_type.is_dir() {
            create_dir(&target, mode)?;
            summary.dirs += 1;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(ArchiveError::Io)?;
            }
            let mut file = create_file(&target, mode)?;
            summary.bytes += copy_entry(&mut entry, &mut file)?;
            restore_times(&file, entry.header(), &target);
            summary.files += 1;
        } else {
            warn!(
                path = %path.display(),
                entry_type = ?entry_type,
                "skipping archive entry that is not a file or directory"
            );
            summary.skipped += 1;
        }
    }

    Ok(summary)
}

/// Drop the synthetic root directory and reject anything but plain
/// segments. `None` for the root entry itself.
fn strip_root(path: &Path) -> Result<Option<PathBuf>, ArchiveError> {
    let unsafe_path = || ArchiveError::UnsafePath(path.display().to_string());

    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    match components.next() {
        None => return Ok(None),
        Some(Component::Normal(_)) => {}
        Some(_) => return Err(unsafe_path()),
    }

    let mut rel = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => rel.push(part),
            _ => return Err(unsafe_path()),
        }
    }

    Ok((!rel.as_os_str().is_empty()).then_some(rel))
}

#[cfg(unix)]
fn create_dir(path: &Path, mode: u32) -> Result<(), ArchiveError> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(ArchiveError::Io)
}

#[cfg(not(unix))]
fn create_dir(path: &Path, _mode: u32) -> Result<(), ArchiveError> {
    fs::create_dir_all(path).map_err(ArchiveError::Io)
}

fn create_file(path: &Path, mode: u32) -> Result<File, ArchiveError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path).map_err(ArchiveError::Io)
}

/// Read errors come from the archive stream; write errors are local.
fn copy_entry(entry: &mut impl Read, file: &mut File) -> Result<u64, ArchiveError> {
    let mut buf = vec![0u8; COPY_BUF_LEN];
    let mut total = 0u64;
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(upstream(e)),
        };
        file.write_all(&buf[..n]).map_err(ArchiveError::Io)?;
        total += n as u64;
    }
    Ok(total)
}

/// Restore mtime when the archive records one. A missing atime becomes now.
fn restore_times(file: &File, header: &tar::Header, path: &Path) {
    let mtime = match header.mtime() {
        Ok(secs) if secs > 0 => UNIX_EPOCH + Duration::from_secs(secs),
        _ => return,
    };
    let atime = header
        .as_gnu()
        .and_then(|gnu| gnu.atime().ok())
        .filter(|secs| *secs > 0)
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap_or_else(SystemTime::now);

    let times = FileTimes::new().set_modified(mtime).set_accessed(atime);
    if let Err(e) = file.set_times(times) {
        warn!(path = %path.display(), error = %e, "failed to restore file times");
    }
}
