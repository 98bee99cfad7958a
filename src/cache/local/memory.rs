use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{LocalTier, TierRecord, TierUsage};
use crate::cache::error::CacheError;

/// In-process tier backed by a concurrent map. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryTier {
    records: DashMap<String, TierRecord>,
    bytes: AtomicU64,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<TierRecord>, CacheError> {
        Ok(self.records.get(key).map(|record| record.value().clone()))
    }

    async fn store(&self, key: &str, record: TierRecord) -> Result<(), CacheError> {
        self.bytes
            .fetch_add(record.bytes.len() as u64, Ordering::Relaxed);
        if let Some(previous) = self.records.insert(key.to_string(), record) {
            self.bytes
                .fetch_sub(previous.bytes.len() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn replace(
        &self,
        key: &str,
        current: &TierRecord,
        next: TierRecord,
    ) -> Result<bool, CacheError> {
        let Some(mut slot) = self.records.get_mut(key) else {
            return Ok(false);
        };
        if *slot != *current {
            return Ok(false);
        }
        self.bytes
            .fetch_add(next.bytes.len() as u64, Ordering::Relaxed);
        self.bytes
            .fetch_sub(current.bytes.len() as u64, Ordering::Relaxed);
        *slot = next;
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        match self.records.remove(key) {
            Some((_, previous)) => {
                self.bytes
                    .fetch_sub(previous.bytes.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.records.iter().map(|item| item.key().clone()).collect())
    }

    async fn expired_keys(&self, now_ms: i64) -> Result<Vec<String>, CacheError> {
        Ok(self
            .records
            .iter()
            .filter(|item| item.value().expires_at_ms < now_ms)
            .map(|item| item.key().clone())
            .collect())
    }

    async fn expires_at(&self, key: &str) -> Result<Option<i64>, CacheError> {
        Ok(self.records.get(key).map(|record| record.expires_at_ms))
    }

    async fn size_of(&self, key: &str) -> Result<u64, CacheError> {
        Ok(self
            .records
            .get(key)
            .map(|record| record.bytes.len() as u64)
            .unwrap_or(0))
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let removed = self.records.len() as u64;
        self.records.clear();
        self.bytes.store(0, Ordering::Relaxed);
        Ok(removed)
    }

    async fn usage(&self) -> Result<TierUsage, CacheError> {
        Ok(TierUsage {
            keys: self.records.len() as u64,
            bytes: self.bytes.load(Ordering::Relaxed),
        })
    }
}
