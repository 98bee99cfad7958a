//! Record types shared between the gazette cache and its collaborators.
//!
//! The aggregation client produces [`Article`] values after normalising
//! provider payloads; the UI layer consumes them (or the lighter
//! [`ArticleMetadata`] projection) through the cache's read accessors.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A normalised news article.
///
/// `id` is stable and immutable. `slug` is the stable public identifier and
/// resolves to the same record as `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub url: String,
    pub image_url: Option<String>,
    pub source: String,
    pub category: String,
    pub author_id: String,
    pub author_name: String,
    pub tags: Vec<String>,
    pub published_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
    pub is_trending: bool,
    pub is_featured: bool,
}

impl Article {
    /// Age of the article relative to `now`; zero for future-dated records.
    pub fn age_at(&self, now: OffsetDateTime) -> time::Duration {
        let age = now - self.published_at;
        if age.is_negative() {
            time::Duration::ZERO
        } else {
            age
        }
    }

    pub fn metadata(&self) -> ArticleMetadata {
        ArticleMetadata::from(self)
    }
}

/// Metadata-only projection of an [`Article`]: everything except the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub image_url: Option<String>,
    pub source: String,
    pub category: String,
    pub author_id: String,
    pub author_name: String,
    pub tags: Vec<String>,
    pub published_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
    pub is_trending: bool,
    pub is_featured: bool,
}

impl From<&Article> for ArticleMetadata {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id.clone(),
            slug: article.slug.clone(),
            title: article.title.clone(),
            summary: article.summary.clone(),
            url: article.url.clone(),
            image_url: article.image_url.clone(),
            source: article.source.clone(),
            category: article.category.clone(),
            author_id: article.author_id.clone(),
            author_name: article.author_name.clone(),
            tags: article.tags.clone(),
            published_at: article.published_at,
            updated_at: article.updated_at,
            view_count: article.view_count,
            like_count: article.like_count,
            comment_count: article.comment_count,
            is_trending: article.is_trending,
            is_featured: article.is_featured,
        }
    }
}

/// A page of search hits as returned by the aggregation client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults<T> {
    pub query: String,
    pub total: u64,
    pub page: u32,
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn sample() -> Article {
        Article {
            id: "a-1".to_string(),
            slug: "first-light".to_string(),
            title: "First light".to_string(),
            summary: "Telescope sees first light".to_string(),
            content: "Long body".to_string(),
            url: "https://news.example/first-light".to_string(),
            image_url: None,
            source: "example".to_string(),
            category: "science".to_string(),
            author_id: "42".to_string(),
            author_name: "R. Vega".to_string(),
            tags: vec!["space".to_string()],
            published_at: datetime!(2026-10-01 08:00 UTC),
            updated_at: datetime!(2026-10-01 09:00 UTC),
            view_count: 10,
            like_count: 2,
            comment_count: 0,
            is_trending: false,
            is_featured: true,
        }
    }

    #[test]
    fn metadata_projection_drops_only_the_body() {
        let article = sample();
        let meta = article.metadata();
        assert_eq!(meta.id, article.id);
        assert_eq!(meta.slug, article.slug);
        assert_eq!(meta.tags, article.tags);
        assert!(meta.is_featured);

        let json = serde_json::to_value(&meta).expect("serialize metadata");
        assert!(json.get("content").is_none());
    }

    #[test]
    fn age_is_never_negative() {
        let article = sample();
        let before = datetime!(2026-09-30 08:00 UTC);
        assert_eq!(article.age_at(before), time::Duration::ZERO);
        let after = datetime!(2026-10-01 09:30 UTC);
        assert_eq!(article.age_at(after), time::Duration::minutes(90));
    }
}
