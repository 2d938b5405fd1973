//! Build keys, tags, and the cache key wire format.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Field separator for tag derivation and cache keys.
const SEPARATOR: char = '\0';

/// Number of digest bytes kept for a tag (128 bits).
const TAG_BYTES: usize = 16;

/// Length of a rendered tag in hex characters.
pub const TAG_LEN: usize = TAG_BYTES * 2;

/// Identifies one desired build input.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildKey {
    pub owner: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl BuildKey {
    /// Create a build key without validation.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            reference: reference.into(),
        }
    }

    /// Create a build key from request input, rejecting empty fields and
    /// fields containing the separator byte.
    pub fn parse(owner: &str, repo: &str, reference: &str) -> Result<Self> {
        for (name, value) in [("owner", owner), ("repo", repo), ("ref", reference)] {
            if value.is_empty() {
                return Err(Error::InvalidBuildKey(format!("{name} is empty")));
            }
            if value.contains(SEPARATOR) {
                return Err(Error::InvalidBuildKey(format!(
                    "{name} contains a NUL byte"
                )));
            }
        }
        Ok(Self::new(owner, repo, reference))
    }

    /// Derive this key's tag.
    pub fn tag(&self) -> Tag {
        derive_tag(self)
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.reference)
    }
}

/// Derive the tag for a build key.
///
/// The tag is the first 128 bits of SHA-256 over `owner NUL repo NUL ref`,
/// rendered as 32 lowercase hex characters.
pub fn derive_tag(key: &BuildKey) -> Tag {
    let mut hasher = Sha256::new();
    hasher.update(key.owner.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.repo.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.reference.as_bytes());
    let digest = hasher.finalize();
    Tag(digest[..TAG_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// A fixed-width lowercase hex identifier for a build key.
///
/// Safe as a DNS label and as a path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// Parse a tag, requiring exactly 32 lowercase hex characters.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != TAG_LEN {
            return Err(Error::InvalidTag(format!(
                "expected {TAG_LEN} hex chars, got {}",
                s.len()
            )));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(Error::InvalidTag(format!("not lowercase hex: {s}")));
        }
        Ok(Self(s.to_string()))
    }

    /// Parse a tag from a DNS label, which is case-insensitive.
    pub fn from_label(label: &str) -> Result<Self> {
        Self::parse(&label.to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage prefix for this tag: `a/b/rest`.
    pub fn shard_path(&self) -> String {
        format!("{}/{}/{}", &self.0[..1], &self.0[1..2], &self.0[2..])
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Tag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

/// The key the build cache is addressed by: the tag plus the original
/// build key, so a builder never needs a second lookup.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tag: Tag,
    key: BuildKey,
}

impl CacheKey {
    pub fn new(key: BuildKey) -> Self {
        Self {
            tag: key.tag(),
            key,
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn build_key(&self) -> &BuildKey {
        &self.key
    }

    /// Wire form: `tag NUL owner NUL repo NUL ref`.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(
            TAG_LEN + self.key.owner.len() + self.key.repo.len() + self.key.reference.len() + 3,
        );
        out.push_str(self.tag.as_str());
        for field in [&self.key.owner, &self.key.repo, &self.key.reference] {
            out.push(SEPARATOR);
            out.push_str(field);
        }
        out
    }

    /// Decode the wire form, checking that the tag matches the key.
    pub fn decode(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        let [tag, owner, repo, reference] = parts.as_slice() else {
            return Err(Error::InvalidCacheKey(format!(
                "expected 4 fields, got {}",
                parts.len()
            )));
        };

        let tag = Tag::parse(tag)?;
        let key = BuildKey::parse(owner, repo, reference)?;
        let derived = key.tag();
        if derived != tag {
            return Err(Error::TagMismatch {
                expected: derived.to_string(),
                actual: tag.to_string(),
            });
        }
        Ok(Self { tag, key })
    }
}

impl From<BuildKey> for CacheKey {
    fn from(key: BuildKey) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tag, self.key)
    }
}
