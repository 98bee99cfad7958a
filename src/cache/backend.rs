//! The contract both adapters implement.

use async_trait::async_trait;

use super::entry::{CacheEntry, SetOptions};
use super::error::CacheError;
use super::stats::CacheStats;

/// A physical cache store.
///
/// Values cross this boundary untyped (`serde_json::Value`); the façade
/// converts to and from the caller's concrete type.
///
/// Reads apply lazy expiry: an entry past `expires_at` is deleted and reported
/// as absent. A hit updates `last_accessed`/`access_count` and writes the
/// metadata back. That write is a read-modify-write without a lock, so
/// concurrent readers of one key may lose increments; the counters are
/// approximate popularity signals and are left that way.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name used in logs, stats and metric labels.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<serde_json::Value>>, CacheError>;

    /// Returns `false` when the write was dropped (quota, unavailable store).
    async fn set(
        &self,
        key: &str,
        data: serde_json::Value,
        options: &SetOptions,
    ) -> Result<bool, CacheError>;

    /// Idempotent; reports whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes keys starting with `prefix`, or everything (tag index
    /// included) when no prefix is given. Returns the number of removed keys.
    async fn clear(&self, prefix: Option<&str>) -> Result<u64, CacheError>;

    /// Deletes every key indexed under each tag, then the tag itself.
    /// Returns the number of removed keys.
    async fn invalidate_by_tags(&self, tags: &[String]) -> Result<u64, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Prunes logically expired entries and dangling tag references.
    /// Returns the number of pruned entries and references.
    async fn cleanup(&self) -> Result<u64, CacheError>;
}
