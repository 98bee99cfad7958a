//! Immutable per-content-class cache policies.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::entry::{Priority, SetOptions};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentClass {
    Article,
    SearchResults,
    UserProfile,
    Category,
    ImageMetadata,
    ApiResponse,
}

impl ContentClass {
    pub const ALL: [ContentClass; 6] = [
        ContentClass::Article,
        ContentClass::SearchResults,
        ContentClass::UserProfile,
        ContentClass::Category,
        ContentClass::ImageMetadata,
        ContentClass::ApiResponse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentClass::Article => "article",
            ContentClass::SearchResults => "search-results",
            ContentClass::UserProfile => "user-profile",
            ContentClass::Category => "category",
            ContentClass::ImageMetadata => "image-metadata",
            ContentClass::ApiResponse => "api-response",
        }
    }

    pub fn strategy(self) -> &'static CacheStrategy {
        match self {
            ContentClass::Article => &ARTICLE,
            ContentClass::SearchResults => &SEARCH_RESULTS,
            ContentClass::UserProfile => &USER_PROFILE,
            ContentClass::Category => &CATEGORY,
            ContentClass::ImageMetadata => &IMAGE_METADATA,
            ContentClass::ApiResponse => &API_RESPONSE,
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Ttl,
    Size,
}

/// Policy bundle shared by every entry of one content class.
#[derive(Debug, PartialEq, Eq)]
pub struct CacheStrategy {
    pub base_ttl: Duration,
    pub max_size: u64,
    pub eviction: EvictionPolicy,
    pub compress: bool,
    pub tags: &'static [&'static str],
}

impl CacheStrategy {
    /// Options seeded from this strategy; callers may refine them.
    pub fn options(&self) -> SetOptions {
        SetOptions {
            ttl: Some(self.base_ttl),
            tags: self.tags.iter().map(|tag| (*tag).to_string()).collect(),
            priority: Priority::Medium,
            version: None,
            compress: self.compress,
            max_size: Some(self.max_size),
        }
    }
}

static ARTICLE: CacheStrategy = CacheStrategy {
    base_ttl: Duration::from_secs(3600),
    max_size: MIB,
    eviction: EvictionPolicy::Lru,
    compress: true,
    tags: &["articles", "content"],
};

static SEARCH_RESULTS: CacheStrategy = CacheStrategy {
    base_ttl: Duration::from_secs(900),
    max_size: 512 * KIB,
    eviction: EvictionPolicy::Lfu,
    compress: true,
    tags: &["search"],
};

static USER_PROFILE: CacheStrategy = CacheStrategy {
    base_ttl: Duration::from_secs(1800),
    max_size: 64 * KIB,
    eviction: EvictionPolicy::Lru,
    compress: false,
    tags: &["users"],
};

static CATEGORY: CacheStrategy = CacheStrategy {
    base_ttl: Duration::from_secs(7200),
    max_size: 256 * KIB,
    eviction: EvictionPolicy::Ttl,
    compress: false,
    tags: &["categories"],
};

static IMAGE_METADATA: CacheStrategy = CacheStrategy {
    base_ttl: Duration::from_secs(86_400),
    max_size: 16 * KIB,
    eviction: EvictionPolicy::Size,
    compress: false,
    tags: &["images"],
};

static API_RESPONSE: CacheStrategy = CacheStrategy {
    base_ttl: Duration::from_secs(300),
    max_size: 256 * KIB,
    eviction: EvictionPolicy::Ttl,
    compress: true,
    tags: &["api"],
};
