//! Cache key and tag builders.
//!
//! Every key the subsystem writes is built here so that the article layer,
//! the façade helpers and the admin CLI agree on the layout.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const TRENDING_INDEX_KEY: &str = "index:trending";
pub const CATEGORY_REGISTRY_KEY: &str = "index:categories";
pub const AUTHOR_REGISTRY_KEY: &str = "index:authors";
pub const POPULARITY_RANKING_KEY: &str = "popularity:ranking";
pub const POPULARITY_AGGREGATE_KEY: &str = "popularity:aggregate";

pub const ARTICLES_TAG: &str = "articles";
pub const CONTENT_TAG: &str = "content";
pub const SEARCH_TAG: &str = "search";
pub const FEATURED_TAG: &str = "featured";
pub const TRENDING_TAG: &str = "trending";
pub const INDEXES_TAG: &str = "indexes";
pub const POPULARITY_TAG: &str = "popularity";

/// Lowercases and trims a free-form key segment (category names, search text).
pub fn normalize_segment(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn article_key(id: &str) -> String {
    format!("article:{id}")
}

pub fn article_metadata_key(id: &str) -> String {
    format!("article:meta:{id}")
}

pub fn article_slug_key(slug: &str) -> String {
    format!("article:slug:{slug}")
}

pub fn article_metrics_key(id: &str) -> String {
    format!("metrics:article:{id}")
}

pub fn category_index_key(category: &str) -> String {
    format!("index:category:{}", normalize_segment(category))
}

pub fn author_index_key(author_id: &str) -> String {
    format!("index:author:{author_id}")
}

pub fn search_key(query: &str, page: u32) -> String {
    format!("search:{:016x}", hash_search(query, page))
}

pub fn article_tag(id: &str) -> String {
    format!("article:{id}")
}

pub fn category_tag(category: &str) -> String {
    format!("category:{}", normalize_segment(category))
}

pub fn author_tag(author_id: &str) -> String {
    format!("author:{author_id}")
}

pub fn topic_tag(tag: &str) -> String {
    format!("tag:{}", normalize_segment(tag))
}

pub fn search_query_tag(query: &str) -> String {
    format!("search:{}", normalize_segment(query))
}

fn hash_search(query: &str, page: u32) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize_segment(query).hash(&mut hasher);
    page.hash(&mut hasher);
    hasher.finish()
}

/// Numeric identifiers are never looked up as slugs.
pub fn is_numeric_identifier(identifier: &str) -> bool {
    !identifier.is_empty() && identifier.bytes().all(|b| b.is_ascii_digit())
}

/// Ids and slugs become the last key segment, so they may not contain the
/// separator.
pub fn is_key_segment(identifier: &str) -> bool {
    !identifier.is_empty() && !identifier.contains(':')
}
