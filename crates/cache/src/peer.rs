//! Forwarding builds to the peer that owns a key.
//!
//! Peers talk plain HTTP: `GET {peer}{base_path}{percent-encoded cache key}`
//! answers with the artifact set as JSON, or with a [`BuildError`] body and
//! its status. A peer that answers with a classified error is authoritative;
//! a peer that cannot be reached is not, and the caller may build locally.

use crate::ring::HashRing;
use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use sitehist_core::config::PeerConfig;
use sitehist_core::{ArtifactSet, BuildError, CacheKey, Tag};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Why a forwarded build did not produce a set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    /// The peer could not be reached or answered with something unreadable.
    #[error("peer transport error: {0}")]
    Transport(String),

    /// The peer ran the build and it failed.
    #[error("peer build failed: {0}")]
    Remote(BuildError),
}

/// Why a [`PeerPicker`] could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum PickerError {
    #[error("invalid peer configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Client(#[from] PeerError),
}

/// A remote node able to produce artifact sets.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<ArtifactSet, PeerError>;

    /// Base URL identifying this peer on the ring.
    fn url(&self) -> &str;
}

/// [`PeerClient`] over HTTP.
pub struct HttpPeer {
    client: reqwest::Client,
    url: String,
    base_path: String,
}

impl fmt::Debug for HttpPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPeer")
            .field("url", &self.url)
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl HttpPeer {
    pub fn new(
        url: impl Into<String>,
        base_path: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            base_path: base_path.into(),
        })
    }

    fn request_url(&self, key: &CacheKey) -> String {
        format!(
            "{}{}{}",
            self.url.trim_end_matches('/'),
            self.base_path,
            utf8_percent_encode(&key.encode(), NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl PeerClient for HttpPeer {
    async fn fetch(&self, key: &CacheKey) -> Result<ArtifactSet, PeerError> {
        let url = self.request_url(key);
        debug!(peer = %self.url, tag = %key.tag(), "forwarding build");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PeerError::Transport(format!("{}: {e}", self.url)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PeerError::Transport(format!("{}: {e}", self.url)))?;

        if status.is_success() {
            let set: ArtifactSet = serde_json::from_slice(&body).map_err(|e| {
                PeerError::Transport(format!("{}: invalid artifact set: {e}", self.url))
            })?;
            if &set.tag != key.tag() {
                return Err(PeerError::Transport(format!(
                    "{}: answered for tag {} instead of {}",
                    self.url,
                    set.tag,
                    key.tag()
                )));
            }
            return Ok(set);
        }

        match serde_json::from_slice::<BuildError>(&body) {
            Ok(err) => Err(PeerError::Remote(err)),
            Err(_) => Err(PeerError::Transport(format!(
                "{}: unexpected status {status}",
                self.url
            ))),
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Chooses the owner of each tag among the fleet.
pub struct PeerPicker {
    self_url: String,
    ring: HashRing,
    clients: HashMap<String, Arc<dyn PeerClient>>,
}

impl PeerPicker {
    /// Ring over this node plus `peers`.
    pub fn new(
        self_url: impl Into<String>,
        peers: Vec<Arc<dyn PeerClient>>,
        replicas: usize,
    ) -> Self {
        let self_url = self_url.into();
        let clients: HashMap<String, Arc<dyn PeerClient>> = peers
            .into_iter()
            .filter(|p| p.url() != self_url)
            .map(|p| (p.url().to_string(), p))
            .collect();
        let ring = HashRing::new(
            std::iter::once(self_url.clone()).chain(clients.keys().cloned()),
            replicas,
        );
        Self {
            self_url,
            ring,
            clients,
        }
    }

    /// Build a picker with HTTP peers. `None` in single-node mode.
    pub fn from_config(config: &PeerConfig) -> Result<Option<Self>, PickerError> {
        config.validate().map_err(PickerError::Config)?;
        let Some(self_url) = config.self_url.clone().filter(|_| !config.urls.is_empty()) else {
            return Ok(None);
        };

        let mut peers: Vec<Arc<dyn PeerClient>> = Vec::new();
        for url in config.urls.iter().filter(|u| **u != self_url) {
            peers.push(Arc::new(HttpPeer::new(
                url.clone(),
                config.base_path.clone(),
                config.timeout(),
            )?));
        }
        Ok(Some(Self::new(self_url, peers, config.replicas)))
    }

    /// The peer that owns `tag`, or `None` when this node does.
    pub fn pick(&self, tag: &Tag) -> Option<Arc<dyn PeerClient>> {
        let owner = self.ring.owner(tag.as_str().as_bytes())?;
        if owner == self.self_url {
            return None;
        }
        self.clients.get(owner).cloned()
    }

    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    pub fn len(&self) -> usize {
        self.ring.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
