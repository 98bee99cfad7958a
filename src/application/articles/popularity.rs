//! Popularity tracking.
//!
//! Every article hit bumps a per-article metrics entry and the shared
//! ranking by an amount inversely proportional to the read latency. A fast
//! read is taken as a warm, popular article; this conflates "fast because
//! cached" with "popular" and is kept as the signal.

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Score added by a read that took zero time.
const MAX_INCREMENT: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetrics {
    pub article_id: String,
    pub hits: u64,
    pub score: f64,
    pub last_hit: OffsetDateTime,
}

impl ArticleMetrics {
    pub fn new(article_id: &str, now: OffsetDateTime) -> Self {
        Self {
            article_id: article_id.to_string(),
            hits: 0,
            score: 0.0,
            last_hit: now,
        }
    }

    pub fn record_hit(&mut self, increment: f64, now: OffsetDateTime) {
        self.hits = self.hits.saturating_add(1);
        self.score += increment;
        self.last_hit = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub article_id: String,
    pub score: f64,
}

/// Summary written by maintenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityAggregate {
    pub tracked: usize,
    pub total_score: f64,
    pub top: Vec<String>,
    pub computed_at: OffsetDateTime,
}

/// Lower latency gives a larger increment; one millisecond halves it.
pub fn latency_score(latency: Duration) -> f64 {
    MAX_INCREMENT / (1.0 + latency.as_secs_f64() * 1000.0)
}

/// Adds `increment` to `article_id` (inserting it if needed), re-sorts
/// descending and truncates to `limit`.
pub fn bump(ranking: &mut Vec<RankingEntry>, article_id: &str, increment: f64, limit: usize) {
    match ranking.iter_mut().find(|entry| entry.article_id == article_id) {
        Some(entry) => entry.score += increment,
        None => ranking.push(RankingEntry {
            article_id: article_id.to_string(),
            score: increment,
        }),
    }
    sort_and_truncate(ranking, limit);
}

pub fn sort_and_truncate(ranking: &mut Vec<RankingEntry>, limit: usize) {
    ranking.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.article_id.cmp(&b.article_id))
    });
    ranking.truncate(limit);
}

pub fn aggregate(ranking: &[RankingEntry], top: usize, now: OffsetDateTime) -> PopularityAggregate {
    PopularityAggregate {
        tracked: ranking.len(),
        total_score: ranking.iter().map(|entry| entry.score).sum(),
        top: ranking
            .iter()
            .take(top)
            .map(|entry| entry.article_id.clone())
            .collect(),
        computed_at: now,
    }
}
