//! Shared-store adapter over Redis.
//!
//! Key layout under the configured prefix:
//!
//! - `entry:{key}` holds the serialized [`StoredEntry`] with a native TTL.
//! - `tag:{tag}` is a set of logical keys carrying that tag.
//! - `tags:{key}` is the reverse set, so a delete can leave every tag set.
//!
//! Every call runs under the command timeout. Unless `strict` is set, a
//! failed or timed-out call is logged, counted and answered like a miss.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::backend::CacheBackend;
use super::config::RemoteConfig;
use super::entry::{CacheEntry, SetOptions, StoredEntry};
use super::error::CacheError;
use super::stats::{AdapterCounters, CacheStats};

const SOURCE: &str = "cache::remote";
const SCAN_BATCH: usize = 200;

pub struct RemoteAdapter {
    conn: ConnectionManager,
    config: RemoteConfig,
    default_ttl: Duration,
    default_version: String,
    counters: AdapterCounters,
}

impl RemoteAdapter {
    /// Connects and verifies the server answers `PING` within the connect
    /// timeout.
    pub async fn connect(
        config: &RemoteConfig,
        default_ttl: Duration,
        default_version: &str,
    ) -> Result<Self, CacheError> {
        let url = config.connection_url()?;
        let client = redis::Client::open(url.as_str())?;

        let handshake = async {
            let mut conn = ConnectionManager::new(client).await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await?;
            Ok::<_, redis::RedisError>(conn)
        };
        let conn = match tokio::time::timeout(config.connect_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => return Err(CacheError::Timeout { op: "connect" }),
        };

        info!(
            target = SOURCE,
            host = %config.host,
            port = config.port,
            db = config.db,
            "connected to remote cache"
        );

        Ok(Self {
            conn,
            config: config.clone(),
            default_ttl,
            default_version: default_version.to_string(),
            counters: AdapterCounters::new("redis"),
        })
    }

    fn entry_key(&self, key: &str) -> String {
        entry_key(&self.config.key_prefix, key)
    }

    async fn run<T, F>(&self, op: &'static str, work: F) -> Result<T, CacheError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.command_timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CacheError::backend(op, err.to_string())),
            Err(_) => Err(CacheError::Timeout { op }),
        }
    }

    fn settle<T>(
        &self,
        op: &'static str,
        result: Result<T, CacheError>,
        fallback: T,
    ) -> Result<T, CacheError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.counters.error(op);
                warn!(
                    target = SOURCE,
                    op,
                    strict = self.config.strict,
                    error = %err,
                    "remote cache operation failed"
                );
                if self.config.strict {
                    Err(err)
                } else {
                    Ok(fallback)
                }
            }
        }
    }

    async fn read_entry(
        &self,
        key: &str,
    ) -> Result<Option<CacheEntry<serde_json::Value>>, CacheError> {
        let prefix = self.config.key_prefix.as_str();
        let entry_key = self.entry_key(key);
        let mut conn = self.conn.clone();

        let raw = self
            .run("get", async {
                redis::cmd("GET")
                    .arg(&entry_key)
                    .query_async::<Option<Vec<u8>>>(&mut conn)
                    .await
            })
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let now = OffsetDateTime::now_utc();
        let mut stored = match StoredEntry::from_bytes(&raw) {
            Ok(stored) if !stored.metadata.is_expired_at(now) => stored,
            Ok(_) => {
                debug!(target = SOURCE, key, "entry expired on read");
                self.run("get", remove_entry(&mut conn, prefix, key)).await?;
                return Ok(None);
            }
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "dropping unreadable entry");
                self.run("get", remove_entry(&mut conn, prefix, key)).await?;
                return Ok(None);
            }
        };

        stored.metadata.touch(now);
        if let Some(remaining) = stored.metadata.remaining_ttl(now) {
            let bytes = stored.to_bytes()?;
            // XX: never resurrect a key deleted since the GET.
            let written = self
                .run("touch", async {
                    redis::cmd("SET")
                        .arg(&entry_key)
                        .arg(bytes)
                        .arg("PX")
                        .arg(ttl_millis(remaining))
                        .arg("XX")
                        .query_async::<()>(&mut conn)
                        .await
                })
                .await;
            if let Err(err) = written {
                debug!(target = SOURCE, key, error = %err, "access stats not persisted");
            }
        }

        match stored.into_entry() {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "dropping undecodable entry");
                self.run("get", remove_entry(&mut conn, prefix, key)).await?;
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
        let ttl_ms = ttl_millis(ttl);
        let prefix = self.config.key_prefix.as_str();
        let entry_key = self.entry_key(key);
        let mut conn = self.conn.clone();

        self.run("set", async {
            detach_tags(&mut conn, prefix, key).await?;
            redis::cmd("SET")
                .arg(&entry_key)
                .arg(bytes)
                .arg("PX")
                .arg(ttl_ms)
                .query_async::<()>(&mut conn)
                .await?;

            if stored.metadata.tags.is_empty() {
                return Ok(());
            }
            let reverse = reverse_key(prefix, key);
            for tag in &stored.metadata.tags {
                let tag_key = tag_key(prefix, tag);
                redis::cmd("SADD")
                    .arg(&tag_key)
                    .arg(key)
                    .query_async::<()>(&mut conn)
                    .await?;
                extend_expiry(&mut conn, &tag_key, ttl_ms).await?;
                redis::cmd("SADD")
                    .arg(&reverse)
                    .arg(tag)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
            redis::cmd("PEXPIRE")
                .arg(&reverse)
                .arg(ttl_ms)
                .query_async::<()>(&mut conn)
                .await
        })
        .await?;
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        self.run("delete", remove_entry(&mut conn, &self.config.key_prefix, key))
            .await
    }

    async fn check_exists(&self, key: &str) -> Result<bool, CacheError> {
        let entry_key = self.entry_key(key);
        let mut conn = self.conn.clone();
        let pttl = self
            .run("exists", async {
                redis::cmd("PTTL")
                    .arg(&entry_key)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(pttl != -2)
    }

    async fn clear_entries(&self, prefix: Option<&str>) -> Result<u64, CacheError> {
        let namespace = self.config.key_prefix.as_str();
        let mut conn = self.conn.clone();
        match prefix {
            None => {
                let pattern = format!("{}*", escape_glob(namespace));
                let entries = format!("{namespace}entry:");
                self.run("clear", async {
                    let mut removed = 0u64;
                    for key in scan_keys(&mut conn, &pattern).await? {
                        let deleted: u64 =
                            redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
                        if deleted > 0 && key.starts_with(&entries) {
                            removed += 1;
                        }
                    }
                    Ok(removed)
                })
                .await
            }
            Some(prefix) => {
                let pattern = format!("{}*", escape_glob(&entry_key(namespace, prefix)));
                let strip = entry_key(namespace, "");
                self.run("clear", async {
                    let mut removed = 0u64;
                    for full in scan_keys(&mut conn, &pattern).await? {
                        let Some(key) = full.strip_prefix(&strip) else {
                            continue;
                        };
                        if remove_entry(&mut conn, namespace, key).await? {
                            removed += 1;
                        }
                    }
                    Ok(removed)
                })
                .await
            }
        }
    }

    async fn invalidate(&self, tags: &[String]) -> Result<u64, CacheError> {
        let prefix = self.config.key_prefix.as_str();
        let mut conn = self.conn.clone();
        self.run("invalidate", async {
            let mut removed = 0u64;
            for tag in tags {
                let tag_key = tag_key(prefix, tag);
                let members: Vec<String> = redis::cmd("SMEMBERS")
                    .arg(&tag_key)
                    .query_async(&mut conn)
                    .await?;
                for key in &members {
                    if remove_entry(&mut conn, prefix, key).await? {
                        removed += 1;
                    }
                }
                redis::cmd("DEL")
                    .arg(&tag_key)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
            Ok(removed)
        })
        .await
    }

    async fn usage(&self) -> Result<(u64, u64), CacheError> {
        let mut conn = self.conn.clone();
        self.run("stats", async {
            let keys: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
            let info: String = redis::cmd("INFO")
                .arg("memory")
                .query_async(&mut conn)
                .await?;
            Ok((keys, parse_used_memory(&info)))
        })
        .await
    }

    async fn prune(&self) -> Result<u64, CacheError> {
        let prefix = self.config.key_prefix.as_str();
        let tag_pattern = format!("{}*", escape_glob(&tag_key(prefix, "")));
        let reverse_pattern = format!("{}*", escape_glob(&reverse_key(prefix, "")));
        let reverse_strip = reverse_key(prefix, "");
        let mut conn = self.conn.clone();

        self.run("cleanup", async {
            let mut pruned = 0u64;
            for tag_key in scan_keys(&mut conn, &tag_pattern).await? {
                let members: Vec<String> = redis::cmd("SMEMBERS")
                    .arg(&tag_key)
                    .query_async(&mut conn)
                    .await?;
                for key in members {
                    let live: bool = redis::cmd("EXISTS")
                        .arg(entry_key(prefix, &key))
                        .query_async(&mut conn)
                        .await?;
                    if !live {
                        let dropped: u64 = redis::cmd("SREM")
                            .arg(&tag_key)
                            .arg(&key)
                            .query_async(&mut conn)
                            .await?;
                        pruned += dropped;
                    }
                }
            }
            for reverse in scan_keys(&mut conn, &reverse_pattern).await? {
                let Some(key) = reverse.strip_prefix(&reverse_strip) else {
                    continue;
                };
                let live: bool = redis::cmd("EXISTS")
                    .arg(entry_key(prefix, key))
                    .query_async(&mut conn)
                    .await?;
                if !live {
                    redis::cmd("DEL")
                        .arg(&reverse)
                        .query_async::<()>(&mut conn)
                        .await?;
                    pruned += 1;
                }
            }
            Ok(pruned)
        })
        .await
    }
}

#[async_trait]
impl CacheBackend for RemoteAdapter {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<serde_json::Value>>, CacheError> {
        let started = Instant::now();
        let result = self.read_entry(key).await;
        self.counters.observe("get", started);
        let entry = self.settle("get", result, None)?;
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
        let written = self.settle("set", result, false)?;
        if !written {
            self.counters.dropped_write();
        }
        Ok(written)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let started = Instant::now();
        let result = self.remove(key).await;
        self.counters.observe("delete", started);
        self.settle("delete", result, false)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let result = self.check_exists(key).await;
        self.settle("exists", result, false)
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<u64, CacheError> {
        let result = self.clear_entries(prefix).await;
        let removed = self.settle("clear", result, 0)?;
        info!(target = SOURCE, prefix = prefix.unwrap_or("*"), removed, "remote cache cleared");
        Ok(removed)
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> Result<u64, CacheError> {
        let result = self.invalidate(tags).await;
        let removed = self.settle("invalidate", result, 0)?;
        self.counters.invalidated(removed as usize);
        debug!(target = SOURCE, tags = ?tags, removed, "tags invalidated");
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let result = self.usage().await;
        let (keys, used_memory) = self.settle("stats", result, (0, 0))?;
        Ok(self.counters.snapshot(keys, used_memory))
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        let result = self.prune().await;
        let pruned = self.settle("cleanup", result, 0)?;
        self.counters.cleaned_up(OffsetDateTime::now_utc());
        debug!(target = SOURCE, pruned, "remote cleanup finished");
        Ok(pruned)
    }
}

fn entry_key(prefix: &str, key: &str) -> String {
    format!("{prefix}entry:{key}")
}

fn tag_key(prefix: &str, tag: &str) -> String {
    format!("{prefix}tag:{tag}")
}

fn reverse_key(prefix: &str, key: &str) -> String {
    format!("{prefix}tags:{key}")
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escapes the glob metacharacters `SCAN MATCH` understands.
fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn parse_used_memory(info: &str) -> u64 {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> RedisResult<Vec<String>> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(&mut *conn)
            .await?;
        keys.extend(batch);
        cursor = next;
        if cursor == 0 {
            break;
        }
    }
    keys.sort_unstable();
    keys.dedup();
    Ok(keys)
}

/// Pushes a tag set's expiry out to at least `ttl_ms`.
async fn extend_expiry(
    conn: &mut ConnectionManager,
    tag_key: &str,
    ttl_ms: u64,
) -> RedisResult<()> {
    let current: i64 = redis::cmd("PTTL").arg(tag_key).query_async(&mut *conn).await?;
    let shorter = current == -1 || u64::try_from(current).is_ok_and(|left| left < ttl_ms);
    if shorter {
        redis::cmd("PEXPIRE")
            .arg(tag_key)
            .arg(ttl_ms)
            .query_async::<()>(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Removes `key` from every tag set listed in its reverse set.
async fn detach_tags(conn: &mut ConnectionManager, prefix: &str, key: &str) -> RedisResult<()> {
    let reverse = reverse_key(prefix, key);
    let tags: Vec<String> = redis::cmd("SMEMBERS")
        .arg(&reverse)
        .query_async(&mut *conn)
        .await?;
    for tag in tags {
        redis::cmd("SREM")
            .arg(tag_key(prefix, &tag))
            .arg(key)
            .query_async::<()>(&mut *conn)
            .await?;
    }
    redis::cmd("DEL")
        .arg(&reverse)
        .query_async::<()>(&mut *conn)
        .await
}

async fn remove_entry(conn: &mut ConnectionManager, prefix: &str, key: &str) -> RedisResult<bool> {
    detach_tags(conn, prefix, key).await?;
    let deleted: u64 = redis::cmd("DEL")
        .arg(entry_key(prefix, key))
        .query_async(&mut *conn)
        .await?;
    Ok(deleted > 0)
}
