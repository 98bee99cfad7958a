//! Content-aware TTL policy for articles.
//!
//! The TTL starts from the category table (or the article strategy), is
//! capped for recently published articles, and only articles outside both
//! recency windows are stretched by the popularity multiplier. The floor is
//! applied last.

use std::time::Duration;

use gazette_types::Article;
use time::OffsetDateTime;

use super::ArticleCacheConfig;
use crate::cache::{ContentClass, keys};

const HOUR: time::Duration = time::Duration::hours(1);
const DAY: time::Duration = time::Duration::days(1);

/// Category-specific base TTLs; fast-moving desks expire first.
pub fn category_ttl(category: &str) -> Option<Duration> {
    let seconds = match keys::normalize_segment(category).as_str() {
        "breaking" => 300,
        "politics" | "sports" => 900,
        "business" | "world" => 1800,
        "technology" | "entertainment" => 3600,
        "science" | "health" => 7200,
        "lifestyle" | "opinion" => 14_400,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    base: Duration,
    min_ttl: Duration,
    fresh_ceiling: Duration,
    recent_ceiling: Duration,
    popularity_multiplier: f64,
    popular_view_threshold: u64,
}

impl TtlPolicy {
    pub fn new(config: &ArticleCacheConfig) -> Self {
        Self {
            base: ContentClass::Article.strategy().base_ttl,
            min_ttl: config.min_ttl,
            fresh_ceiling: config.fresh_ceiling,
            recent_ceiling: config.recent_ceiling,
            popularity_multiplier: config.popularity_multiplier,
            popular_view_threshold: config.popular_view_threshold,
        }
    }

    pub fn is_popular(&self, article: &Article) -> bool {
        article.is_trending
            || article.is_featured
            || article.view_count > self.popular_view_threshold
    }

    pub fn ttl_for(&self, article: &Article, now: OffsetDateTime) -> Duration {
        let base = category_ttl(&article.category).unwrap_or(self.base);
        let age = article.age_at(now);

        let ttl = if age < HOUR {
            base.min(self.fresh_ceiling)
        } else if age < DAY {
            base.min(self.recent_ceiling)
        } else if self.is_popular(article) {
            base.mul_f64(self.popularity_multiplier.max(1.0))
        } else {
            base
        };

        ttl.max(self.min_ttl)
    }
}
