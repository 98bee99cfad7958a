//! Article cache layer.
//!
//! Sits on top of [`CacheManager`] and knows what an article is: it picks a
//! TTL from the category, age and popularity, writes the full record next to
//! a metadata projection and a slug mapping, keeps the category, author and
//! trending indexes, and tracks popularity on reads.

mod indexes;
mod maintenance;
mod popularity;
mod ttl;

pub use indexes::{normalize as normalize_index, push_front};
pub use maintenance::MaintenanceReport;
pub(crate) use maintenance::METRIC_MAINTENANCE_MS;
pub use popularity::{ArticleMetrics, PopularityAggregate, RankingEntry, latency_score};
pub use ttl::{TtlPolicy, category_ttl};

use std::sync::Arc;
use std::time::{Duration, Instant};

use gazette_types::Article;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheError, CacheManager, ContentClass, Priority, SetOptions, keys};

const SOURCE: &str = "application::articles";

/// Lifetime of per-article metrics and the shared ranking.
const POPULARITY_TTL: Duration = Duration::from_secs(86_400);
/// Ids listed in the popularity aggregate.
const AGGREGATE_TOP: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ArticleCacheConfig {
    pub min_ttl: Duration,
    /// Ceiling for articles published less than an hour ago.
    pub fresh_ceiling: Duration,
    /// Ceiling for articles published less than a day ago.
    pub recent_ceiling: Duration,
    pub popularity_multiplier: f64,
    pub popular_view_threshold: u64,
    pub category_index_limit: usize,
    pub author_index_limit: usize,
    pub trending_limit: usize,
    pub ranking_limit: usize,
}

impl Default for ArticleCacheConfig {
    fn default() -> Self {
        Self {
            min_ttl: Duration::from_secs(60),
            fresh_ceiling: Duration::from_secs(900),
            recent_ceiling: Duration::from_secs(3600),
            popularity_multiplier: 2.0,
            popular_view_threshold: 10_000,
            category_index_limit: 100,
            author_index_limit: 50,
            trending_limit: 50,
            ranking_limit: 1000,
        }
    }
}

impl From<&crate::config::ArticleSettings> for ArticleCacheConfig {
    fn from(settings: &crate::config::ArticleSettings) -> Self {
        Self {
            min_ttl: Duration::from_secs(settings.min_ttl_seconds),
            fresh_ceiling: Duration::from_secs(settings.fresh_ceiling_seconds),
            recent_ceiling: Duration::from_secs(settings.recent_ceiling_seconds),
            popularity_multiplier: settings.popularity_multiplier,
            popular_view_threshold: settings.popular_view_threshold,
            category_index_limit: settings.category_index_limit,
            author_index_limit: settings.author_index_limit,
            trending_limit: settings.trending_limit,
            ranking_limit: settings.ranking_limit,
        }
    }
}

/// Tags attached to every record written for `article`.
pub fn article_tags(article: &Article) -> Vec<String> {
    let mut tags = vec![
        keys::ARTICLES_TAG.to_string(),
        keys::CONTENT_TAG.to_string(),
        keys::article_tag(&article.id),
        keys::category_tag(&article.category),
        keys::author_tag(&article.author_id),
    ];
    tags.extend(article.tags.iter().map(|tag| keys::topic_tag(tag)));
    if article.is_featured {
        tags.push(keys::FEATURED_TAG.to_string());
    }
    if article.is_trending {
        tags.push(keys::TRENDING_TAG.to_string());
    }
    tags.sort();
    tags.dedup();
    tags
}

pub struct ArticleCacheManager {
    cache: Arc<CacheManager>,
    config: ArticleCacheConfig,
    ttl: TtlPolicy,
}

impl ArticleCacheManager {
    pub fn new(cache: Arc<CacheManager>, config: ArticleCacheConfig) -> Self {
        let ttl = TtlPolicy::new(&config);
        Self { cache, config, ttl }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn config(&self) -> &ArticleCacheConfig {
        &self.config
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Caches `article` with its projections and index entries.
    ///
    /// Returns `false` when the full record was not written (refused or
    /// dropped); nothing else is written in that case.
    #[instrument(skip_all, fields(article_id = %article.id, category = %article.category))]
    pub async fn cache_article(&self, article: &Article) -> Result<bool, CacheError> {
        if !keys::is_key_segment(&article.id) || !keys::is_key_segment(&article.slug) {
            warn!(
                target = SOURCE,
                slug = %article.slug,
                "article id or slug is not a valid key segment"
            );
            return Ok(false);
        }
        let now = OffsetDateTime::now_utc();
        let ttl = self.ttl.ttl_for(article, now);
        let strategy = ContentClass::Article.strategy();
        let priority = if self.ttl.is_popular(article) {
            Priority::High
        } else {
            Priority::Medium
        };
        let options = SetOptions::default()
            .with_tags(article_tags(article))
            .with_priority(priority)
            .compressed(strategy.compress)
            .with_max_size(strategy.max_size);

        let written = self
            .cache
            .set(
                &keys::article_key(&article.id),
                article,
                options.clone().with_ttl(ttl),
            )
            .await?;
        if !written {
            info!(target = SOURCE, article_id = %article.id, "article not cached");
            return Ok(false);
        }

        let metadata = article.metadata();
        let metadata_key = keys::article_metadata_key(&article.id);
        let slug_key = keys::article_slug_key(&article.slug);
        let (meta, slug) = futures::join!(
            self.cache.set(
                &metadata_key,
                &metadata,
                options.clone().with_ttl(ttl.mul_f64(1.5)),
            ),
            self.cache.set(
                &slug_key,
                &article.id,
                options.with_ttl(ttl * 2),
            ),
        );
        if !meta? {
            debug!(target = SOURCE, article_id = %article.id, "metadata projection not cached");
        }
        if !slug? {
            debug!(target = SOURCE, article_id = %article.id, "slug mapping not cached");
        }

        self.update_indexes(article, ttl).await?;
        debug!(
            target = SOURCE,
            article_id = %article.id,
            ttl_secs = ttl.as_secs(),
            "article cached"
        );
        Ok(true)
    }

    async fn update_indexes(&self, article: &Article, ttl: Duration) -> Result<(), CacheError> {
        let index_ttl = indexes::index_ttl(ttl);
        let registry_ttl = indexes::registry_ttl(ttl);

        if !article.category.trim().is_empty() {
            let category = keys::normalize_segment(&article.category);
            let index_key = keys::category_index_key(&category);
            let (index, registry) = futures::join!(
                indexes::prepend(
                    &self.cache,
                    &index_key,
                    &article.id,
                    self.config.category_index_limit,
                    indexes::index_options(index_ttl, keys::category_tag(&category)),
                ),
                indexes::register(
                    &self.cache,
                    keys::CATEGORY_REGISTRY_KEY,
                    &category,
                    registry_ttl,
                ),
            );
            index?;
            registry?;
        }

        if !article.author_id.is_empty() {
            let index_key = keys::author_index_key(&article.author_id);
            let (index, registry) = futures::join!(
                indexes::prepend(
                    &self.cache,
                    &index_key,
                    &article.id,
                    self.config.author_index_limit,
                    indexes::index_options(index_ttl, keys::author_tag(&article.author_id)),
                ),
                indexes::register(
                    &self.cache,
                    keys::AUTHOR_REGISTRY_KEY,
                    &article.author_id,
                    registry_ttl,
                ),
            );
            index?;
            registry?;
        }

        if article.is_trending {
            indexes::prepend(
                &self.cache,
                keys::TRENDING_INDEX_KEY,
                &article.id,
                self.config.trending_limit,
                indexes::index_options(
                    ContentClass::Article.strategy().base_ttl,
                    keys::TRENDING_TAG.to_string(),
                ),
            )
            .await?;
        }
        Ok(())
    }

    /// Looks up by id, then by slug unless the identifier is numeric.
    /// Identifiers containing the key separator never match. A hit feeds the
    /// popularity ranking.
    #[instrument(skip(self))]
    pub async fn get_article(&self, identifier: &str) -> Result<Option<Article>, CacheError> {
        if !keys::is_key_segment(identifier) {
            return Ok(None);
        }
        let started = Instant::now();
        let mut article = self
            .cache
            .get_value::<Article>(&keys::article_key(identifier))
            .await?;

        if article.is_none() && !keys::is_numeric_identifier(identifier) {
            let id = self
                .cache
                .get_value::<String>(&keys::article_slug_key(identifier))
                .await?;
            if let Some(id) = id {
                article = self.cache.get_value::<Article>(&keys::article_key(&id)).await?;
            }
        }

        if let Some(found) = &article {
            self.record_hit(&found.id, started.elapsed()).await;
        }
        Ok(article)
    }

    /// Metadata projection by id, without touching popularity.
    pub async fn get_article_metadata(
        &self,
        id: &str,
    ) -> Result<Option<gazette_types::ArticleMetadata>, CacheError> {
        if !keys::is_key_segment(id) {
            return Ok(None);
        }
        self.cache.get_value(&keys::article_metadata_key(id)).await
    }

    pub async fn get_articles_by_category(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<Article>, CacheError> {
        self.resolve_index(&keys::category_index_key(category), limit)
            .await
    }

    pub async fn get_articles_by_author(
        &self,
        author_id: &str,
        limit: usize,
    ) -> Result<Vec<Article>, CacheError> {
        self.resolve_index(&keys::author_index_key(author_id), limit)
            .await
    }

    pub async fn get_trending_articles(&self, limit: usize) -> Result<Vec<Article>, CacheError> {
        self.resolve_index(keys::TRENDING_INDEX_KEY, limit).await
    }

    /// Fetches the first `limit` members of an index, skipping any that no
    /// longer resolve.
    async fn resolve_index(&self, key: &str, limit: usize) -> Result<Vec<Article>, CacheError> {
        let Some(ids) = self.cache.get_value::<Vec<String>>(key).await? else {
            return Ok(Vec::new());
        };
        let member_keys: Vec<String> = ids
            .iter()
            .take(limit)
            .map(|id| keys::article_key(id))
            .collect();

        let results = self.cache.get_multiple::<Article>(&member_keys).await;
        let mut articles = Vec::with_capacity(member_keys.len());
        for (key, result) in member_keys.iter().zip(results) {
            match result? {
                Some(article) => articles.push(article),
                None => debug!(target = SOURCE, key = %key, "index member no longer cached"),
            }
        }
        Ok(articles)
    }

    /// Drops every record tagged with the article id.
    #[instrument(skip(self))]
    pub async fn invalidate_article(&self, id: &str) -> Result<u64, CacheError> {
        self.cache.invalidate_article(id).await
    }

    async fn record_hit(&self, article_id: &str, latency: Duration) {
        let increment = latency_score(latency);
        if let Err(err) = self.bump_popularity(article_id, increment).await {
            warn!(target = SOURCE, article_id, error = %err, "popularity update failed");
        }
    }

    async fn bump_popularity(&self, article_id: &str, increment: f64) -> Result<(), CacheError> {
        let now = OffsetDateTime::now_utc();
        let metrics_key = keys::article_metrics_key(article_id);

        let (metrics, ranking) = futures::join!(
            self.cache.get_value::<ArticleMetrics>(&metrics_key),
            self.cache
                .get_value::<Vec<RankingEntry>>(keys::POPULARITY_RANKING_KEY),
        );
        let mut metrics = metrics?.unwrap_or_else(|| ArticleMetrics::new(article_id, now));
        let mut ranking = ranking?.unwrap_or_default();

        metrics.record_hit(increment, now);
        popularity::bump(&mut ranking, article_id, increment, self.config.ranking_limit);

        let (metrics_written, ranking_written) = futures::join!(
            self.cache.set(&metrics_key, &metrics, popularity_options()),
            self.cache
                .set(keys::POPULARITY_RANKING_KEY, &ranking, popularity_options()),
        );
        metrics_written?;
        ranking_written?;
        Ok(())
    }

    /// Runs [`perform_maintenance`](Self::perform_maintenance) every
    /// `cadence`, starting one cadence from now.
    pub fn spawn_maintenance(self: &Arc<Self>, cadence: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                if let Err(err) = manager.perform_maintenance().await {
                    error!(target = SOURCE, error = %err, "article cache maintenance failed");
                }
            }
        })
    }
}

fn popularity_options() -> SetOptions {
    SetOptions::default()
        .with_ttl(POPULARITY_TTL)
        .with_tags([keys::POPULARITY_TAG])
        .with_priority(Priority::Low)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn sample() -> Article {
        let at = datetime!(2026-10-16 12:00 UTC);
        Article {
            id: "7".to_string(),
            slug: "seven".to_string(),
            title: "Seven".to_string(),
            summary: String::new(),
            content: String::new(),
            url: "https://news.example/seven".to_string(),
            image_url: None,
            source: "wire".to_string(),
            category: "Science".to_string(),
            author_id: "42".to_string(),
            author_name: "Desk".to_string(),
            tags: vec!["Space".to_string(), "space".to_string()],
            published_at: at,
            updated_at: at,
            view_count: 0,
            like_count: 0,
            comment_count: 0,
            is_trending: true,
            is_featured: false,
        }
    }

    #[test]
    fn tags_cover_every_relationship() {
        let tags = article_tags(&sample());
        for expected in [
            "articles",
            "content",
            "article:7",
            "category:science",
            "author:42",
            "tag:space",
            "trending",
        ] {
            assert!(tags.iter().any(|t| t == expected), "missing {expected}");
        }
        assert!(!tags.iter().any(|t| t == "featured"));
        assert_eq!(tags.iter().filter(|t| *t == "tag:space").count(), 1);
    }

    #[test]
    fn default_config_values() {
        let config = ArticleCacheConfig::default();
        assert_eq!(config.min_ttl, Duration::from_secs(60));
        assert_eq!(config.category_index_limit, 100);
        assert_eq!(config.author_index_limit, 50);
        assert_eq!(config.ranking_limit, 1000);
    }
}
