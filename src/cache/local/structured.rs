//! SQLite-backed tier that survives restarts.

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::{LocalTier, TierRecord, TierUsage};
use crate::cache::error::CacheError;

const IN_MEMORY: &str = ":memory:";

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY NOT NULL,
    record BLOB NOT NULL,
    size INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
)
"#;

const CREATE_EXPIRY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS cache_entries_expires_at ON cache_entries (expires_at)";

#[derive(sqlx::FromRow)]
struct RecordRow {
    record: Vec<u8>,
    expires_at: i64,
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    keys: i64,
    bytes: i64,
}

#[derive(Debug, Clone)]
pub struct SqliteTier {
    pool: SqlitePool,
}

impl SqliteTier {
    /// Opens (creating if needed) the database named `database_name`.
    ///
    /// A bare name gets a `.sqlite3` extension; `:memory:` opens a private
    /// in-memory database that lives as long as the pool.
    pub async fn open(database_name: &str) -> Result<Self, CacheError> {
        let options = if database_name == IN_MEMORY {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(database_path(database_name))
                .create_if_missing(true)
        };

        // One long-lived connection: an in-memory database is per connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_EXPIRY_INDEX).execute(&pool).await?;

        Ok(Self { pool })
    }
}

fn database_path(database_name: &str) -> PathBuf {
    let path = PathBuf::from(database_name);
    if path.extension().is_some() {
        path
    } else {
        path.with_extension("sqlite3")
    }
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[async_trait]
impl LocalTier for SqliteTier {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, key: &str) -> Result<Option<TierRecord>, CacheError> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT record, expires_at FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TierRecord {
            bytes: row.record,
            expires_at_ms: row.expires_at,
        }))
    }

    async fn store(&self, key: &str, record: TierRecord) -> Result<(), CacheError> {
        let size = i64::try_from(record.bytes.len()).unwrap_or(i64::MAX);
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, record, size, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                record = excluded.record,
                size = excluded.size,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(record.bytes)
        .bind(size)
        .bind(record.expires_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace(
        &self,
        key: &str,
        current: &TierRecord,
        next: TierRecord,
    ) -> Result<bool, CacheError> {
        let size = i64::try_from(next.bytes.len()).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            UPDATE cache_entries
            SET record = ?, size = ?, expires_at = ?
            WHERE key = ? AND expires_at = ? AND record = ?
            "#,
        )
        .bind(next.bytes)
        .bind(size)
        .bind(next.expires_at_ms)
        .bind(key)
        .bind(current.expires_at_ms)
        .bind(current.bytes.as_slice())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(sqlx::query_scalar::<_, String>("SELECT key FROM cache_entries")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn expired_keys(&self, now_ms: i64) -> Result<Vec<String>, CacheError> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT key FROM cache_entries WHERE expires_at < ?",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn expires_at(&self, key: &str) -> Result<Option<i64>, CacheError> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT expires_at FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn size_of(&self, key: &str) -> Result<u64, CacheError> {
        let size = sqlx::query_scalar::<_, i64>("SELECT size FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(size.map(to_u64).unwrap_or(0))
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn usage(&self) -> Result<TierUsage, CacheError> {
        let row = sqlx::query_as::<_, UsageRow>(
            "SELECT COUNT(*) AS keys, COALESCE(SUM(size), 0) AS bytes FROM cache_entries",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(TierUsage {
            keys: to_u64(row.keys),
            bytes: to_u64(row.bytes),
        })
    }
}
