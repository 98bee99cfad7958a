//! Process-local adapter.
//!
//! Entries live in a [`LocalTier`]: SQLite when structured storage is
//! enabled and opens cleanly, otherwise an in-process map. The tier is chosen
//! once at construction. Writes are bounded by a byte quota; when a write
//! would exceed it, one cleanup pass runs and the write is retried, then
//! dropped without error.

mod memory;
mod structured;

pub use memory::MemoryTier;
pub use structured::SqliteTier;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::CacheBackend;
use super::config::LocalConfig;
use super::entry::{CacheEntry, SetOptions, StoredEntry};
use super::error::CacheError;
use super::stats::{AdapterCounters, CacheStats};
use super::tag_index::TagIndex;

const SOURCE: &str = "cache::local";

/// Serialized entry plus its expiry, as one tier row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRecord {
    pub bytes: Vec<u8>,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierUsage {
    pub keys: u64,
    pub bytes: u64,
}

/// Raw key/record storage underneath [`LocalAdapter`].
#[async_trait]
pub trait LocalTier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self, key: &str) -> Result<Option<TierRecord>, CacheError>;
    async fn store(&self, key: &str, record: TierRecord) -> Result<(), CacheError>;
    /// Swaps in `next` only while `key` still holds exactly `current`.
    async fn replace(
        &self,
        key: &str,
        current: &TierRecord,
        next: TierRecord,
    ) -> Result<bool, CacheError>;
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
    /// Keys whose expiry lies strictly before `now_ms`.
    async fn expired_keys(&self, now_ms: i64) -> Result<Vec<String>, CacheError>;
    async fn expires_at(&self, key: &str) -> Result<Option<i64>, CacheError>;
    /// Stored size of `key`, zero when absent.
    async fn size_of(&self, key: &str) -> Result<u64, CacheError>;
    async fn clear(&self) -> Result<u64, CacheError>;
    async fn usage(&self) -> Result<TierUsage, CacheError>;
}

pub(crate) fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

pub struct LocalAdapter {
    tier: Box<dyn LocalTier>,
    tags: TagIndex,
    counters: AdapterCounters,
    /// Held across the quota check and the store it admits.
    writes: Mutex<()>,
    quota_bytes: u64,
    default_ttl: Duration,
    default_version: String,
}

impl LocalAdapter {
    /// Selects the tier and rebuilds the tag index from what it holds.
    pub async fn open(config: &LocalConfig, default_ttl: Duration, default_version: &str) -> Self {
        let tier: Box<dyn LocalTier> = if config.structured {
            match SqliteTier::open(&config.database_name).await {
                Ok(tier) => Box::new(tier),
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        database = %config.database_name,
                        error = %err,
                        "structured storage unavailable, using in-memory tier"
                    );
                    Box::new(MemoryTier::new())
                }
            }
        } else {
            Box::new(MemoryTier::new())
        };

        let adapter = Self::with_tier(tier, config.quota_bytes, default_ttl, default_version);
        match adapter.rebuild_tag_index().await {
            Ok(restored) if restored > 0 => {
                info!(target = SOURCE, tier = adapter.tier.name(), restored, "tag index rebuilt");
            }
            Ok(_) => {}
            Err(err) => {
                adapter.counters.error("rebuild");
                warn!(target = SOURCE, error = %err, "failed to rebuild tag index");
            }
        }
        adapter
    }

    pub fn with_tier(
        tier: Box<dyn LocalTier>,
        quota_bytes: u64,
        default_ttl: Duration,
        default_version: &str,
    ) -> Self {
        let counters = AdapterCounters::new(tier.name());
        Self {
            tier,
            tags: TagIndex::new(),
            counters,
            writes: Mutex::new(()),
            quota_bytes,
            default_ttl,
            default_version: default_version.to_string(),
        }
    }

    pub fn tier_name(&self) -> &'static str {
        self.tier.name()
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    /// Re-registers the tags of every live stored entry and drops expired
    /// or unreadable ones. Returns the number of entries registered.
    pub async fn rebuild_tag_index(&self) -> Result<usize, CacheError> {
        let now = OffsetDateTime::now_utc();
        let mut restored = 0;
        for key in self.tier.keys().await? {
            let Some(record) = self.tier.load(&key).await? else {
                continue;
            };
            match StoredEntry::from_bytes(&record.bytes) {
                Ok(stored) if !stored.metadata.is_expired_at(now) => {
                    self.tags
                        .register(&key, &stored.metadata.tags, stored.metadata.expires_at);
                    restored += 1;
                }
                _ => {
                    self.tier.remove(&key).await?;
                }
            }
        }
        Ok(restored)
    }

    async fn remove_key(&self, key: &str) -> Result<bool, CacheError> {
        self.tags.unregister(key);
        self.tier.remove(key).await
    }

    async fn fits(&self, key: &str, incoming: u64) -> Result<bool, CacheError> {
        let usage = self.tier.usage().await?;
        let replaced = self.tier.size_of(key).await?;
        Ok(usage.bytes.saturating_sub(replaced).saturating_add(incoming) <= self.quota_bytes)
    }

    async fn read_entry(
        &self,
        key: &str,
    ) -> Result<Option<CacheEntry<serde_json::Value>>, CacheError> {
        let Some(record) = self.tier.load(key).await? else {
            return Ok(None);
        };
        let mut stored = match StoredEntry::from_bytes(&record.bytes) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "dropping unreadable entry");
                self.remove_key(key).await?;
                return Ok(None);
            }
        };

        let now = OffsetDateTime::now_utc();
        if stored.metadata.is_expired_at(now) {
            debug!(target = SOURCE, key, "entry expired on read");
            self.remove_key(key).await?;
            return Ok(None);
        }

        stored.metadata.touch(now);
        match stored.to_bytes() {
            Ok(bytes) => {
                let touched = TierRecord {
                    bytes,
                    expires_at_ms: record.expires_at_ms,
                };
                match self.tier.replace(key, &record, touched).await {
                    Ok(true) => {}
                    Ok(false) => debug!(target = SOURCE, key, "entry changed during read"),
                    Err(err) => {
                        debug!(target = SOURCE, key, error = %err, "access stats not persisted")
                    }
                }
            }
            Err(err) => debug!(target = SOURCE, key, error = %err, "access stats not encoded"),
        }

        match stored.into_entry() {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "dropping undecodable entry");
                self.remove_key(key).await?;
                Ok(None)
            }
        }
    }

    async fn write_entry(
        &self,
        key: &str,
        data: serde_json::Value,
        options: &SetOptions,
    ) -> Result<bool, CacheError> {
        let now = OffsetDateTime::now_utc();
        let ttl = options.ttl.unwrap_or(self.default_ttl);
        let stored = StoredEntry::build(key, data, options, ttl, &self.default_version, now)?;
        let bytes = stored.to_bytes()?;
        let incoming = bytes.len() as u64;

        let _admitted = self.writes.lock().await;
        if !self.fits(key, incoming).await? {
            info!(
                target = SOURCE,
                key,
                incoming,
                quota = self.quota_bytes,
                "quota reached, cleaning up"
            );
            self.prune(now).await?;
            if !self.fits(key, incoming).await? {
                warn!(
                    target = SOURCE,
                    key,
                    incoming,
                    quota = self.quota_bytes,
                    "write dropped over quota"
                );
                self.counters.dropped_write();
                return Ok(false);
            }
        }

        let record = TierRecord {
            bytes,
            expires_at_ms: unix_millis(stored.metadata.expires_at),
        };
        self.tier.store(key, record).await?;
        self.tags
            .register(key, &stored.metadata.tags, stored.metadata.expires_at);
        Ok(true)
    }

    async fn prune(&self, now: OffsetDateTime) -> Result<u64, CacheError> {
        let mut pruned = 0u64;
        for key in self.tier.expired_keys(unix_millis(now)).await? {
            if self.remove_key(&key).await? {
                pruned += 1;
            }
        }
        let live: HashSet<String> = self.tier.keys().await?.into_iter().collect();
        pruned += self.tags.prune(now, |key| live.contains(key)) as u64;
        self.counters.cleaned_up(now);
        Ok(pruned)
    }

    async fn clear_entries(&self, prefix: Option<&str>) -> Result<u64, CacheError> {
        match prefix {
            None => {
                let removed = self.tier.clear().await?;
                self.tags.clear();
                Ok(removed)
            }
            Some(prefix) => {
                let mut removed = 0;
                for key in self.tier.keys().await? {
                    if key.starts_with(prefix) && self.remove_key(&key).await? {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
        }
    }

    async fn invalidate(&self, tags: &[String]) -> Result<u64, CacheError> {
        let mut removed = 0;
        for tag in tags {
            for key in self.tags.remove_tag(tag) {
                if self.remove_key(&key).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn check_exists(&self, key: &str) -> Result<bool, CacheError> {
        match self.tier.expires_at(key).await? {
            None => Ok(false),
            Some(expires_at_ms) if expires_at_ms < unix_millis(OffsetDateTime::now_utc()) => {
                self.remove_key(key).await?;
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    /// Local failures never reach the caller; they are logged, counted and
    /// replaced by `fallback`.
    fn degrade<T>(&self, op: &'static str, result: Result<T, CacheError>, fallback: T) -> T {
        result.unwrap_or_else(|err| {
            self.counters.error(op);
            warn!(
                target = SOURCE,
                op,
                tier = self.tier.name(),
                error = %err,
                "local cache operation failed"
            );
            fallback
        })
    }
}

#[async_trait]
impl CacheBackend for LocalAdapter {
    fn name(&self) -> &'static str {
        self.tier.name()
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<serde_json::Value>>, CacheError> {
        let started = Instant::now();
        let result = self.read_entry(key).await;
        self.counters.observe("get", started);
        let entry = self.degrade("get", result, None);
        if entry.is_some() {
            self.counters.hit();
        } else {
            self.counters.miss();
        }
        Ok(entry)
    }

    async fn set(
        &self,
        key: &str,
        data: serde_json::Value,
        options: &SetOptions,
    ) -> Result<bool, CacheError> {
        let started = Instant::now();
        let result = self.write_entry(key, data, options).await;
        self.counters.observe("set", started);
        Ok(self.degrade("set", result, false))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let started = Instant::now();
        let result = self.remove_key(key).await;
        self.counters.observe("delete", started);
        Ok(self.degrade("delete", result, false))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let result = self.check_exists(key).await;
        Ok(self.degrade("exists", result, false))
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<u64, CacheError> {
        let result = self.clear_entries(prefix).await;
        let removed = self.degrade("clear", result, 0);
        info!(target = SOURCE, prefix = prefix.unwrap_or("*"), removed, "local cache cleared");
        Ok(removed)
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> Result<u64, CacheError> {
        let result = self.invalidate(tags).await;
        let removed = self.degrade("invalidate", result, 0);
        self.counters.invalidated(removed as usize);
        debug!(target = SOURCE, tags = ?tags, removed, "tags invalidated");
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let result = self.tier.usage().await;
        let usage = self.degrade("stats", result, TierUsage::default());
        Ok(self.counters.snapshot(usage.keys, usage.bytes))
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        let result = self.prune(OffsetDateTime::now_utc()).await;
        let pruned = self.degrade("cleanup", result, 0);
        debug!(target = SOURCE, pruned, "local cleanup finished");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn adapter(quota_bytes: u64) -> LocalAdapter {
        LocalAdapter::with_tier(
            Box::new(MemoryTier::new()),
            quota_bytes,
            Duration::from_secs(60),
            "v1",
        )
    }

    /// Loses every record right after handing it out, as if a delete landed
    /// between the read and the access-stats write-back.
    #[derive(Default)]
    struct VanishingTier {
        inner: MemoryTier,
    }

    #[async_trait]
    impl LocalTier for VanishingTier {
        fn name(&self) -> &'static str {
            "vanishing"
        }
        async fn load(&self, key: &str) -> Result<Option<TierRecord>, CacheError> {
            let record = self.inner.load(key).await?;
            self.inner.remove(key).await?;
            Ok(record)
        }
        async fn store(&self, key: &str, record: TierRecord) -> Result<(), CacheError> {
            self.inner.store(key, record).await
        }
        async fn replace(
            &self,
            key: &str,
            current: &TierRecord,
            next: TierRecord,
        ) -> Result<bool, CacheError> {
            self.inner.replace(key, current, next).await
        }
        async fn remove(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.remove(key).await
        }
        async fn keys(&self) -> Result<Vec<String>, CacheError> {
            self.inner.keys().await
        }
        async fn expired_keys(&self, now_ms: i64) -> Result<Vec<String>, CacheError> {
            self.inner.expired_keys(now_ms).await
        }
        async fn expires_at(&self, key: &str) -> Result<Option<i64>, CacheError> {
            self.inner.expires_at(key).await
        }
        async fn size_of(&self, key: &str) -> Result<u64, CacheError> {
            self.inner.size_of(key).await
        }
        async fn clear(&self) -> Result<u64, CacheError> {
            self.inner.clear().await
        }
        async fn usage(&self) -> Result<TierUsage, CacheError> {
            self.inner.usage().await
        }
    }

    #[tokio::test]
    async fn read_does_not_resurrect_a_concurrently_removed_entry() {
        let cache = LocalAdapter::with_tier(
            Box::new(VanishingTier::default()),
            1 << 20,
            Duration::from_secs(60),
            "v1",
        );
        let tagged = SetOptions::default().with_tags(["author:42"]);
        assert!(cache.set("article:1", json!("body"), &tagged).await.unwrap());

        assert!(cache.get("article:1").await.unwrap().is_some());
        assert!(!cache.exists("article:1").await.unwrap());
        assert_eq!(cache.stats().await.unwrap().total_keys, 0);
    }

    #[tokio::test]
    async fn set_then_get_counts_access() {
        let cache = adapter(1 << 20);
        assert!(cache.set("k", json!({"n": 1}), &SetOptions::default()).await.unwrap());

        let first = cache.get("k").await.unwrap().expect("hit");
        assert_eq!(first.data, json!({"n": 1}));
        assert_eq!(first.metadata.access_count, 1);
        let second = cache.get("k").await.unwrap().expect("hit");
        assert_eq!(second.metadata.access_count, 2);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.total_keys, 1);
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let cache = adapter(1 << 20);
        let options = SetOptions::default().with_ttl(Duration::from_millis(1));
        cache.set("k", json!(1), &options).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(cache.get("k").await.unwrap().is_none());
        assert!(!cache.exists("k").await.unwrap());
        assert_eq!(cache.stats().await.unwrap().total_keys, 0);
    }

    #[tokio::test]
    async fn oversized_write_is_dropped() {
        let cache = adapter(1024);
        let blob = "x".repeat(2048);
        assert!(!cache.set("big", json!(blob), &SetOptions::default()).await.unwrap());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_keys, 0);
        assert_eq!(stats.dropped_writes, 1);
    }

    #[tokio::test]
    async fn quota_pressure_reclaims_expired_entries() {
        let cache = adapter(900);
        let short = SetOptions::default().with_ttl(Duration::from_millis(1));
        cache.set("old", json!("y".repeat(300)), &short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(cache.set("new", json!("z".repeat(300)), &SetOptions::default()).await.unwrap());
        assert!(!cache.exists("old").await.unwrap());
        assert!(cache.exists("new").await.unwrap());
    }

    #[tokio::test]
    async fn tag_invalidation_removes_only_tagged_keys() {
        let cache = adapter(1 << 20);
        let tagged = SetOptions::default().with_tags(["author:42"]);
        cache.set("a", json!(1), &tagged).await.unwrap();
        cache.set("b", json!(2), &tagged).await.unwrap();
        cache.set("c", json!(3), &SetOptions::default().with_tags(["author:7"])).await.unwrap();

        let removed = cache
            .invalidate_by_tags(&["author:42".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(!cache.exists("a").await.unwrap());
        assert!(cache.exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn clear_by_prefix_keeps_other_keys() {
        let cache = adapter(1 << 20);
        cache.set("article:1", json!(1), &SetOptions::default()).await.unwrap();
        cache.set("search:1", json!(2), &SetOptions::default()).await.unwrap();

        assert_eq!(cache.clear(Some("article:")).await.unwrap(), 1);
        assert!(cache.exists("search:1").await.unwrap());
        assert_eq!(cache.clear(None).await.unwrap(), 1);
        assert_eq!(cache.tag_index().key_count(), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cache = adapter(1 << 20);
        cache.set("k", json!(1), &SetOptions::default()).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
    }
}
