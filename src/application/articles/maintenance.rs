use std::collections::HashSet;
use std::time::Instant;

use futures::future::join_all;
use metrics::histogram;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::popularity::{self, ArticleMetrics, RankingEntry};
use super::{AGGREGATE_TOP, ArticleCacheManager, SOURCE, indexes, popularity_options};
use crate::cache::{CacheError, SetOptions, keys};

pub(crate) const METRIC_MAINTENANCE_MS: &str = "gazette_article_maintenance_ms";

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub indexes_checked: usize,
    pub index_ids_dropped: usize,
    pub registry_members_dropped: usize,
    pub metrics_pruned: usize,
    pub ranked: usize,
    pub backend_cleaned: u64,
}

impl ArticleCacheManager {
    /// Trims every index to its bound, drops index members and metrics whose
    /// article is gone, re-syncs the ranking from the per-article metrics,
    /// writes the popularity aggregate and runs the backend cleanup.
    ///
    /// Only ever shrinks or rewrites entries; reads proceed concurrently.
    #[instrument(skip(self))]
    pub async fn perform_maintenance(&self) -> Result<MaintenanceReport, CacheError> {
        let started = Instant::now();
        let now = OffsetDateTime::now_utc();
        let mut report = MaintenanceReport::default();

        self.trim_registry(
            keys::CATEGORY_REGISTRY_KEY,
            |category| keys::category_index_key(category),
            self.config.category_index_limit,
            now,
            &mut report,
        )
        .await?;
        self.trim_registry(
            keys::AUTHOR_REGISTRY_KEY,
            |author| keys::author_index_key(author),
            self.config.author_index_limit,
            now,
            &mut report,
        )
        .await?;
        self.trim_index(
            keys::TRENDING_INDEX_KEY,
            self.config.trending_limit,
            now,
            &mut report,
        )
        .await?;

        self.sync_ranking(now, &mut report).await?;
        report.backend_cleaned = self.cache.cleanup().await?;

        let elapsed = started.elapsed();
        histogram!(METRIC_MAINTENANCE_MS, "backend" => self.cache.backend_name())
            .record(elapsed.as_secs_f64() * 1000.0);
        info!(
            target = SOURCE,
            indexes = report.indexes_checked,
            ids_dropped = report.index_ids_dropped,
            metrics_pruned = report.metrics_pruned,
            ranked = report.ranked,
            cleaned = report.backend_cleaned,
            elapsed_ms = elapsed.as_millis() as u64,
            "article cache maintenance finished"
        );
        Ok(report)
    }

    /// Trims each index listed in a registry and drops members whose index
    /// has disappeared.
    async fn trim_registry<F>(
        &self,
        registry_key: &str,
        index_key: F,
        limit: usize,
        now: OffsetDateTime,
        report: &mut MaintenanceReport,
    ) -> Result<(), CacheError>
    where
        F: Fn(&str) -> String,
    {
        let Some((members, _)) =
            indexes::load_with_lifetime(&self.cache, registry_key, now).await?
        else {
            return Ok(());
        };

        let mut gone = HashSet::new();
        for member in members.iter() {
            if !self.trim_index(&index_key(member), limit, now, report).await? {
                gone.insert(member.clone());
            }
        }

        if !gone.is_empty() {
            report.registry_members_dropped += gone.len();
            self.remove_members(registry_key, &gone, usize::MAX, now).await?;
        }
        Ok(())
    }

    /// Returns whether the index still exists afterwards.
    async fn trim_index(
        &self,
        key: &str,
        limit: usize,
        now: OffsetDateTime,
        report: &mut MaintenanceReport,
    ) -> Result<bool, CacheError> {
        let Some((mut ids, _)) = indexes::load_with_lifetime(&self.cache, key, now).await?
        else {
            return Ok(false);
        };
        report.indexes_checked += 1;

        let oversized = indexes::normalize(&mut ids, limit);
        let checks = join_all(
            ids.iter()
                .map(|id| async move { self.cache.exists(&keys::article_key(id)).await }),
        )
        .await;
        let stale: HashSet<String> = ids
            .iter()
            .zip(checks)
            .filter(|(_, live)| matches!(live, Ok(false)))
            .map(|(id, _)| id.clone())
            .collect();

        if !oversized && stale.is_empty() {
            return Ok(!ids.is_empty());
        }
        report.index_ids_dropped += stale.len();
        let remaining = self.remove_members(key, &stale, limit, now).await?;
        debug!(target = SOURCE, key, len = remaining, "index trimmed");
        Ok(remaining > 0)
    }

    /// Re-reads the list at `key`, removes `stale`, bounds it to `limit` and
    /// writes it back with its remaining lifetime. Ids prepended since the
    /// caller's snapshot are kept. Returns the surviving length.
    async fn remove_members(
        &self,
        key: &str,
        stale: &HashSet<String>,
        limit: usize,
        now: OffsetDateTime,
    ) -> Result<usize, CacheError> {
        let Some((mut current, options)) =
            indexes::load_with_lifetime(&self.cache, key, now).await?
        else {
            return Ok(0);
        };
        current.retain(|id| !stale.contains(id));
        indexes::normalize(&mut current, limit);
        self.rewrite(key, &current, options).await?;
        Ok(current.len())
    }

    async fn rewrite(
        &self,
        key: &str,
        members: &[String],
        options: SetOptions,
    ) -> Result<(), CacheError> {
        if members.is_empty() {
            self.cache.delete(key).await?;
        } else {
            self.cache.set(key, members, options).await?;
        }
        Ok(())
    }

    async fn sync_ranking(
        &self,
        now: OffsetDateTime,
        report: &mut MaintenanceReport,
    ) -> Result<(), CacheError> {
        let ranking = self
            .cache
            .get_value::<Vec<RankingEntry>>(keys::POPULARITY_RANKING_KEY)
            .await?
            .unwrap_or_default();

        let mut synced = Vec::with_capacity(ranking.len());
        for entry in ranking {
            let metrics_key = keys::article_metrics_key(&entry.article_id);
            if !self
                .cache
                .exists(&keys::article_key(&entry.article_id))
                .await?
            {
                self.cache.delete(&metrics_key).await?;
                report.metrics_pruned += 1;
                continue;
            }
            let score = self
                .cache
                .get_value::<ArticleMetrics>(&metrics_key)
                .await?
                .map_or(entry.score, |metrics| metrics.score);
            synced.push(RankingEntry {
                article_id: entry.article_id,
                score,
            });
        }

        popularity::sort_and_truncate(&mut synced, self.config.ranking_limit);
        report.ranked = synced.len();

        let summary = popularity::aggregate(&synced, AGGREGATE_TOP, now);
        self.cache
            .set(keys::POPULARITY_RANKING_KEY, &synced, popularity_options())
            .await?;
        self.cache
            .set(keys::POPULARITY_AGGREGATE_KEY, &summary, popularity_options())
            .await?;
        Ok(())
    }
}
