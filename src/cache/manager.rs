//! The cache façade.
//!
//! [`CacheManager`] owns exactly one adapter, chosen from the execution
//! context when it is built, and layers typed access, schema-version checks,
//! size refusal and the per-content-class helpers on top of it.

use std::sync::Arc;

use futures::future::join_all;
use gazette_types::{Article, SearchResults};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::backend::CacheBackend;
use super::config::{CacheConfig, ExecutionContext};
use super::entry::{CacheEntry, SetOptions};
use super::error::CacheError;
use super::keys;
use super::local::LocalAdapter;
use super::remote::RemoteAdapter;
use super::stats::CacheStats;
use super::strategy::ContentClass;

const SOURCE: &str = "cache::manager";

/// Values the façade can store and hand back.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Send + Sync {}

pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    context: ExecutionContext,
    schema_version: String,
    compress_threshold_bytes: u64,
}

impl CacheManager {
    /// Builds the adapter for `config.context`.
    ///
    /// In server context an unreachable remote store falls back to the local
    /// adapter, unless remote strict mode is set, in which case the
    /// connection error is returned.
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match config.context {
            ExecutionContext::Server => {
                match RemoteAdapter::connect(
                    &config.remote,
                    config.default_ttl,
                    &config.schema_version,
                )
                .await
                {
                    Ok(remote) => Arc::new(remote),
                    Err(err) if config.remote.strict => return Err(err),
                    Err(err) => {
                        warn!(
                            target = SOURCE,
                            error = %err,
                            host = %config.remote.host,
                            port = config.remote.port,
                            "remote cache unreachable, using local adapter"
                        );
                        Arc::new(Self::open_local(config).await)
                    }
                }
            }
            ExecutionContext::Client => Arc::new(Self::open_local(config).await),
        };

        debug!(
            target = SOURCE,
            context = config.context.as_str(),
            backend = backend.name(),
            "cache adapter selected"
        );
        Ok(Self::with_backend(backend, config))
    }

    async fn open_local(config: &CacheConfig) -> LocalAdapter {
        LocalAdapter::open(&config.local, config.default_ttl, &config.schema_version).await
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            context: config.context,
            schema_version: config.schema_version.clone(),
            compress_threshold_bytes: config.compress_threshold_bytes,
        }
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Typed read checked against the manager's schema version.
    pub async fn get<T: Cacheable>(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError> {
        self.get_with_version(key, &self.schema_version).await
    }

    /// Typed read of an entry written with an explicit `version`.
    ///
    /// A version mismatch or a payload that does not decode as `T` is a miss,
    /// and the stale entry is deleted.
    #[instrument(skip(self), target = "cache::manager")]
    pub async fn get_with_version<T: Cacheable>(
        &self,
        key: &str,
        version: &str,
    ) -> Result<Option<CacheEntry<T>>, CacheError> {
        let Some(entry) = self.backend.get(key).await? else {
            return Ok(None);
        };

        if entry.metadata.version != version {
            debug!(
                target = SOURCE,
                key,
                cached = %entry.metadata.version,
                expected = version,
                "stale schema version, evicting"
            );
            self.backend.delete(key).await?;
            return Ok(None);
        }

        match entry.decode::<T>() {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    key,
                    error = %err,
                    "cached payload has an unexpected shape, evicting"
                );
                self.backend.delete(key).await?;
                Ok(None)
            }
        }
    }

    /// Typed read returning only the payload.
    pub async fn get_value<T: Cacheable>(&self, key: &str) -> Result<Option<T>, CacheError> {
        Ok(self.get::<T>(key).await?.map(CacheEntry::into_data))
    }

    /// Writes `data` under `key`.
    ///
    /// Returns `false` without writing when the serialized payload exceeds
    /// `options.max_size`, or when the adapter dropped the write.
    /// Compression is requested only when `options.compress` is set and the
    /// payload reaches the configured threshold.
    #[instrument(skip(self, data, options), target = "cache::manager")]
    pub async fn set<T>(
        &self,
        key: &str,
        data: &T,
        options: SetOptions,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(data)?;
        let size = serde_json::to_vec(&value)?.len() as u64;

        if let Some(max_size) = options.max_size.filter(|max_size| size > *max_size) {
            warn!(target = SOURCE, key, size, max_size, "payload exceeds size limit, not cached");
            return Ok(false);
        }

        let mut options = options;
        options.compress = options.compress && size >= self.compress_threshold_bytes;
        if options.version.is_none() {
            options.version = Some(self.schema_version.clone());
        }

        self.backend.set(key, value, &options).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.exists(key).await
    }

    pub async fn clear(&self, prefix: Option<&str>) -> Result<u64, CacheError> {
        self.backend.clear(prefix).await
    }

    #[instrument(skip(self), target = "cache::manager")]
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> Result<u64, CacheError> {
        self.backend.invalidate_by_tags(tags).await
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.backend.stats().await
    }

    pub async fn cleanup(&self) -> Result<u64, CacheError> {
        self.backend.cleanup().await
    }

    /// Issues every write concurrently; results line up with `items`.
    pub async fn set_multiple<T: Cacheable>(
        &self,
        items: Vec<(String, T, SetOptions)>,
    ) -> Vec<Result<bool, CacheError>> {
        join_all(
            items
                .into_iter()
                .map(|(key, data, options)| async move { self.set(&key, &data, options).await }),
        )
        .await
    }

    /// Issues every read concurrently; results line up with `keys`.
    pub async fn get_multiple<T: Cacheable>(
        &self,
        keys: &[String],
    ) -> Vec<Result<Option<T>, CacheError>> {
        join_all(keys.iter().map(|key| self.get_value::<T>(key))).await
    }

    /// Caches the full record under the article strategy.
    pub async fn cache_article(&self, article: &Article) -> Result<bool, CacheError> {
        let options = ContentClass::Article
            .strategy()
            .options()
            .with_tags([keys::article_tag(&article.id)]);
        self.set(&keys::article_key(&article.id), article, options)
            .await
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<Article>, CacheError> {
        self.get_value(&keys::article_key(id)).await
    }

    pub async fn cache_search_results<T: Cacheable>(
        &self,
        results: &SearchResults<T>,
    ) -> Result<bool, CacheError> {
        let options = ContentClass::SearchResults
            .strategy()
            .options()
            .with_tags([keys::search_query_tag(&results.query)]);
        self.set(
            &keys::search_key(&results.query, results.page),
            results,
            options,
        )
        .await
    }

    pub async fn get_search_results<T: Cacheable>(
        &self,
        query: &str,
        page: u32,
    ) -> Result<Option<SearchResults<T>>, CacheError> {
        self.get_value(&keys::search_key(query, page)).await
    }

    pub async fn invalidate_article(&self, id: &str) -> Result<u64, CacheError> {
        self.invalidate_by_tags(&[keys::article_tag(id)]).await
    }

    /// Drops cached pages for one query, or every cached search when `query`
    /// is `None`.
    pub async fn invalidate_search(&self, query: Option<&str>) -> Result<u64, CacheError> {
        let tag = match query {
            Some(query) => keys::search_query_tag(query),
            None => keys::SEARCH_TAG.to_string(),
        };
        self.invalidate_by_tags(&[tag]).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::cache::local::MemoryTier;

    fn manager(quota_bytes: u64) -> CacheManager {
        let config = CacheConfig::client_in_memory();
        let adapter = LocalAdapter::with_tier(
            Box::new(MemoryTier::new()),
            quota_bytes,
            config.default_ttl,
            &config.schema_version,
        );
        CacheManager::with_backend(Arc::new(adapter), &config)
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        followers: u32,
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let cache = manager(1 << 20);
        let profile = Profile {
            name: "ada".to_string(),
            followers: 12,
        };
        let options = ContentClass::UserProfile.strategy().options();
        assert!(cache.set("user:1", &profile, options).await.unwrap());

        let entry = cache.get::<Profile>("user:1").await.unwrap().expect("hit");
        assert_eq!(entry.data, profile);
        assert!(entry.metadata.tags.contains("users"));
        assert_eq!(entry.metadata.version, cache.schema_version());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = manager(1 << 20);
        cache.set("k", &json!("v1"), SetOptions::default()).await.unwrap();
        cache.set("k", &json!("v2"), SetOptions::default()).await.unwrap();
        assert_eq!(cache.get_value::<String>("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn version_mismatch_is_a_miss_and_evicts() {
        let cache = manager(1 << 20);
        let options = SetOptions::default().with_version("0.0.0-old");
        cache.set("k", &json!(1), options).await.unwrap();

        assert!(cache.get::<u32>("k").await.unwrap().is_none());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn explicit_version_reads_back() {
        let cache = manager(1 << 20);
        cache
            .set("k", &json!(1), SetOptions::default().with_version("shape-2"))
            .await
            .unwrap();
        let hit = cache.get_with_version::<u32>("k", "shape-2").await.unwrap();
        assert_eq!(hit.map(CacheEntry::into_data), Some(1));
    }

    #[tokio::test]
    async fn shape_mismatch_is_a_miss_and_evicts() {
        let cache = manager(1 << 20);
        cache.set("k", &json!({"not": "a number"}), SetOptions::default()).await.unwrap();

        assert!(cache.get::<u64>("k").await.unwrap().is_none());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn oversized_payload_is_refused() {
        let cache = manager(1 << 20);
        let options = SetOptions::default().with_max_size(16);
        let written = cache.set("k", &"x".repeat(64), options).await.unwrap();
        assert!(!written);
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn batch_helpers_keep_positions() {
        let cache = manager(1 << 20);
        let written = cache
            .set_multiple(vec![
                ("a".to_string(), 1u32, SetOptions::default()),
                ("b".to_string(), 2u32, SetOptions::default().with_max_size(0)),
                ("c".to_string(), 3u32, SetOptions::default().with_ttl(Duration::from_secs(5))),
            ])
            .await;
        let written: Vec<bool> = written.into_iter().map(Result::unwrap).collect();
        assert_eq!(written, vec![true, false, true]);

        let keys = ["c", "missing", "a"].map(String::from);
        let values: Vec<Option<u32>> = cache
            .get_multiple::<u32>(&keys)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(values, vec![Some(3), None, Some(1)]);
    }

    #[tokio::test]
    async fn search_results_are_keyed_by_query_and_page() {
        let cache = manager(1 << 20);
        let results = SearchResults {
            query: "Mars Rover".to_string(),
            total: 2,
            page: 1,
            items: vec!["a".to_string(), "b".to_string()],
        };
        assert!(cache.cache_search_results(&results).await.unwrap());

        let hit = cache
            .get_search_results::<String>("mars rover", 1)
            .await
            .unwrap();
        assert_eq!(hit, Some(results));
        assert!(cache.get_search_results::<String>("mars rover", 2).await.unwrap().is_none());

        assert_eq!(cache.invalidate_search(Some("MARS ROVER")).await.unwrap(), 1);
        assert!(cache.get_search_results::<String>("mars rover", 1).await.unwrap().is_none());
    }
}
