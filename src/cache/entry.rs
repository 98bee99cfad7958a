//! Cache entry model and the envelope adapters persist.
//!
//! Adapters store a [`StoredEntry`] (key, metadata and payload) serialized as
//! JSON. The payload is inline JSON, or LZ4-compressed and base64 encoded when
//! compression was requested and pays off.

use std::collections::BTreeSet;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::CacheError;

/// Payloads smaller than this are never compressed.
pub const MIN_COMPRESS_BYTES: usize = 256;

/// Eviction hint carried with every entry. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Bookkeeping stored next to every cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub last_accessed: OffsetDateTime,
    pub access_count: u64,
    pub tags: BTreeSet<String>,
    pub size: u64,
    pub priority: Priority,
    pub version: String,
    pub compressed: bool,
}

impl EntryMetadata {
    /// Builds metadata for a fresh write. `ttl` is raised to one millisecond
    /// so that `expires_at > created_at` always holds.
    pub fn new(now: OffsetDateTime, ttl: Duration, options: &SetOptions, version: &str) -> Self {
        let ttl = ttl.max(Duration::from_millis(1));
        Self {
            created_at: now,
            expires_at: now + ttl,
            last_accessed: now,
            access_count: 0,
            tags: options.tags.iter().cloned().collect(),
            size: 0,
            priority: options.priority,
            version: options
                .version
                .clone()
                .unwrap_or_else(|| version.to_string()),
            compressed: false,
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    /// Time left before logical expiry, `None` once expired.
    pub fn remaining_ttl(&self, now: OffsetDateTime) -> Option<Duration> {
        let left = self.expires_at - now;
        if left.is_positive() {
            Duration::try_from(left).ok()
        } else {
            None
        }
    }

    /// Records a read hit.
    pub fn touch(&mut self, now: OffsetDateTime) {
        self.last_accessed = now;
        self.access_count = self.access_count.saturating_add(1);
    }
}

/// A cached value together with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub data: T,
    pub metadata: EntryMetadata,
}

impl<T> CacheEntry<T> {
    pub fn into_data(self) -> T {
        self.data
    }
}

impl CacheEntry<serde_json::Value> {
    /// Converts the untyped payload into the type the caller expects.
    pub fn decode<T: DeserializeOwned>(self) -> Result<CacheEntry<T>, serde_json::Error> {
        Ok(CacheEntry {
            key: self.key,
            data: serde_json::from_value(self.data)?,
            metadata: self.metadata,
        })
    }
}

/// Per-write options. A missing `ttl` means the adapter default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub priority: Priority,
    pub version: Option<String>,
    pub compress: bool,
    pub max_size: Option<u64>,
}

impl SetOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

/// Payload as persisted by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Json(serde_json::Value),
    Lz4(String),
}

/// The envelope adapters read and write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub metadata: EntryMetadata,
    pub payload: Payload,
}

impl StoredEntry {
    pub fn build(
        key: &str,
        data: serde_json::Value,
        options: &SetOptions,
        ttl: Duration,
        default_version: &str,
        now: OffsetDateTime,
    ) -> Result<Self, CacheError> {
        let mut metadata = EntryMetadata::new(now, ttl, options, default_version);
        let raw = serde_json::to_vec(&data)?;

        let payload = if options.compress && raw.len() >= MIN_COMPRESS_BYTES {
            let packed = lz4::block::compress(&raw, None, true)
                .map_err(|err| CacheError::compression(err.to_string()))?;
            if packed.len() < raw.len() {
                metadata.compressed = true;
                metadata.size = packed.len() as u64;
                Payload::Lz4(STANDARD.encode(packed))
            } else {
                metadata.size = raw.len() as u64;
                Payload::Json(data)
            }
        } else {
            metadata.size = raw.len() as u64;
            Payload::Json(data)
        };

        Ok(Self {
            key: key.to_string(),
            metadata,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn into_entry(self) -> Result<CacheEntry<serde_json::Value>, CacheError> {
        let data = match self.payload {
            Payload::Json(value) => value,
            Payload::Lz4(encoded) => {
                let packed = STANDARD
                    .decode(encoded)
                    .map_err(|err| CacheError::compression(err.to_string()))?;
                let raw = lz4::block::decompress(&packed, None)
                    .map_err(|err| CacheError::compression(err.to_string()))?;
                serde_json::from_slice(&raw)?
            }
        };
        Ok(CacheEntry {
            key: self.key,
            data,
            metadata: self.metadata,
        })
    }
}
