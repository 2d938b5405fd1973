//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base domain; artifact hosts are `<tag>.<domain>`.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Scheme used in build redirects.
    #[serde(default = "default_redirect_scheme")]
    pub redirect_scheme: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_redirect_scheme() -> String {
    "https".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            domain: default_domain(),
            redirect_scheme: default_redirect_scheme(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/artifacts"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// Where source archives come from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Base URL of the source-control API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Optional bearer token for the API.
    /// WARNING: Prefer SITEHIST_BUILD__ARCHIVE__TOKEN over storing in config.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bound on the whole fetch, body included.
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    format!("sitehist/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token: None,
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl ArchiveConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How the static-site generator is invoked.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeneratorConfig {
    /// Run the generator directly as a child process.
    Command {
        #[serde(default = "default_program")]
        program: String,
        /// Extra arguments appended after the fixed safety flags.
        #[serde(default)]
        args: Vec<String>,
        /// Environment passed to the child; nothing else is inherited
        /// except PATH.
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Run the generator inside a throwaway container.
    Container {
        /// Container CLI: "docker" or "podman".
        #[serde(default = "default_runtime")]
        runtime: String,
        #[serde(default = "default_image")]
        image: String,
        #[serde(default = "default_memory_limit_bytes")]
        memory_limit_bytes: u64,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

fn default_program() -> String {
    "jekyll".to_string()
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "jekyll/jekyll".to_string()
}

fn default_memory_limit_bytes() -> u64 {
    100 * 1024 * 1024
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::Command {
            program: default_program(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Build pipeline configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Root under which per-tag working trees are created.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Keep working trees after a build for debugging.
    #[serde(default)]
    pub keep_working_dirs: bool,
    /// Process-level timeout for the generator.
    #[serde(default = "default_build_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("sitehist")
}

fn default_build_timeout_secs() -> u64 {
    600
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            keep_working_dirs: false,
            timeout_secs: default_build_timeout_secs(),
            archive: ArchiveConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Build cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Budget for the in-memory fast path, in approximate bytes.
    #[serde(default = "default_max_weight_bytes")]
    pub max_weight_bytes: u64,
    /// Files at or below this size are stored uncompressed.
    #[serde(default = "default_compress_min_size")]
    pub compress_min_size: u64,
}

fn default_max_weight_bytes() -> u64 {
    crate::DEFAULT_CACHE_WEIGHT_BYTES
}

fn default_compress_min_size() -> u64 {
    crate::DEFAULT_COMPRESS_MIN_SIZE
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_weight_bytes: default_max_weight_bytes(),
            compress_min_size: default_compress_min_size(),
        }
    }
}

/// Fleet membership for build ownership.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    /// This node's own base URL, as it appears in `urls`.
    #[serde(default)]
    pub self_url: Option<String>,
    /// Base URLs of every node in the fleet, including this one.
    /// Empty means single-node mode.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Virtual nodes per peer on the hash ring.
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// Bound on a forwarded build. Must exceed the build timeout.
    #[serde(default = "default_peer_timeout_secs")]
    pub timeout_secs: u64,
    /// Path prefix of the peer endpoint.
    #[serde(default = "default_peer_base_path")]
    pub base_path: String,
}

fn default_replicas() -> usize {
    50
}

fn default_peer_timeout_secs() -> u64 {
    660
}

fn default_peer_base_path() -> String {
    "/_buildcache/".to_string()
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            self_url: None,
            urls: Vec::new(),
            replicas: default_replicas(),
            timeout_secs: default_peer_timeout_secs(),
            base_path: default_peer_base_path(),
        }
    }
}

impl PeerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate fleet configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.urls.is_empty() {
            return Ok(());
        }
        let Some(self_url) = &self.self_url else {
            return Err("peers.self_url is required when peers.urls is set".to_string());
        };
        if !self.urls.iter().any(|u| u == self_url) {
            return Err(format!("peers.urls does not contain self_url {self_url}"));
        }
        if self.replicas == 0 {
            return Err("peers.replicas must be at least 1".to_string());
        }
        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            return Err(format!(
                "peers.base_path must start and end with '/': {}",
                self.base_path
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub peers: PeerConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage and a single node.
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.peers.validate()?;
        if self.server.domain.is_empty() {
            return Err("server.domain must not be empty".to_string());
        }
        Ok(())
    }
}
