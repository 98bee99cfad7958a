//! Gazette cache subsystem.
//!
//! One [`CacheManager`] per process fronts exactly one adapter:
//!
//! - **Remote** ([`RemoteAdapter`]): a shared Redis store, used in server
//!   context.
//! - **Local** ([`LocalAdapter`]): a per-process store with a byte quota,
//!   backed by SQLite when available and an in-memory map otherwise.
//!
//! Both adapters store the same envelope (see [`StoredEntry`]), apply lazy
//! expiry on read and keep a tag index for bulk invalidation.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! context = "server"
//! default_ttl_seconds = 3600
//!
//! [remote]
//! host = "127.0.0.1"
//! port = 6379
//! key_prefix = "gazette:"
//!
//! [local]
//! quota_bytes = 52428800
//! database_name = "gazette-cache"
//! ```

mod backend;
mod config;
mod entry;
mod error;
pub mod keys;
mod local;
mod lock;
mod manager;
mod remote;
mod stats;
mod strategy;
mod tag_index;

pub use backend::CacheBackend;
pub use config::{CacheConfig, ExecutionContext, LocalConfig, RemoteConfig};
pub use entry::{CacheEntry, EntryMetadata, Payload, Priority, SetOptions, StoredEntry};
pub use error::CacheError;
pub use local::{LocalAdapter, LocalTier, MemoryTier, SqliteTier, TierRecord, TierUsage};
pub use manager::{CacheManager, Cacheable};
pub use remote::RemoteAdapter;
pub use stats::CacheStats;
pub use strategy::{CacheStrategy, ContentClass, EvictionPolicy};
pub use tag_index::TagIndex;

pub(crate) use stats::{
    METRIC_DROPPED_WRITE, METRIC_ERROR, METRIC_HIT, METRIC_INVALIDATED, METRIC_MISS, METRIC_OP_MS,
};
