//! Hit/miss bookkeeping shared by both adapters.
//!
//! Counters live for the lifetime of the adapter instance and are never
//! persisted. Every update is mirrored to the `metrics` facade.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use time::OffsetDateTime;

use super::lock::{self, LockSite};

const SOURCE: &str = "cache::stats";

pub(crate) const METRIC_HIT: &str = "gazette_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "gazette_cache_miss_total";
pub(crate) const METRIC_ERROR: &str = "gazette_cache_error_total";
pub(crate) const METRIC_DROPPED_WRITE: &str = "gazette_cache_dropped_write_total";
pub(crate) const METRIC_INVALIDATED: &str = "gazette_cache_invalidated_total";
pub(crate) const METRIC_OP_MS: &str = "gazette_cache_op_ms";

/// Point-in-time view of an adapter's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub total_keys: u64,
    pub used_memory: u64,
    pub avg_response_time_ms: f64,
    pub last_cleanup: Option<OffsetDateTime>,
    pub errors: u64,
    pub dropped_writes: u64,
}

#[derive(Debug)]
pub struct AdapterCounters {
    backend: &'static str,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    dropped_writes: AtomicU64,
    ops: AtomicU64,
    op_micros: AtomicU64,
    last_cleanup: Mutex<Option<OffsetDateTime>>,
}

impl AdapterCounters {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            dropped_writes: AtomicU64::new(0),
            ops: AtomicU64::new(0),
            op_micros: AtomicU64::new(0),
            last_cleanup: Mutex::new(None),
        }
    }

    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_HIT, "backend" => self.backend).increment(1);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_MISS, "backend" => self.backend).increment(1);
    }

    pub fn error(&self, op: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_ERROR, "backend" => self.backend, "op" => op).increment(1);
    }

    pub fn dropped_write(&self) {
        self.dropped_writes.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_DROPPED_WRITE, "backend" => self.backend).increment(1);
    }

    pub fn invalidated(&self, count: usize) {
        counter!(METRIC_INVALIDATED, "backend" => self.backend).increment(count as u64);
    }

    /// Records the latency of one backend operation started at `started`.
    pub fn observe(&self, op: &'static str, started: Instant) {
        let elapsed = started.elapsed();
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.op_micros.fetch_add(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        histogram!(METRIC_OP_MS, "backend" => self.backend, "op" => op)
            .record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn cleaned_up(&self, at: OffsetDateTime) {
        *lock::lock(&self.last_cleanup, LockSite::new(SOURCE, "cleaned_up")) = Some(at);
    }

    pub fn snapshot(&self, total_keys: u64, used_memory: u64) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            (hits as f64 / lookups as f64, misses as f64 / lookups as f64)
        };
        let ops = self.ops.load(Ordering::Relaxed);
        let avg_response_time_ms = if ops == 0 {
            0.0
        } else {
            self.op_micros.load(Ordering::Relaxed) as f64 / ops as f64 / 1000.0
        };

        CacheStats {
            backend: self.backend,
            hits,
            misses,
            hit_rate,
            miss_rate,
            total_keys,
            used_memory,
            avg_response_time_ms,
            last_cleanup: *lock::lock(&self.last_cleanup, LockSite::new(SOURCE, "snapshot")),
            errors: self.errors.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
        }
    }
}
