//! Secondary indexes over cached articles.
//!
//! Each index is an ordinary cache entry holding article ids, most recent
//! first. Registries list the categories and authors that currently have an
//! index so maintenance can walk all of them.

use std::time::Duration;

use time::OffsetDateTime;
use tracing::debug;

use crate::cache::{CacheError, CacheManager, ContentClass, SetOptions, keys};

const SOURCE: &str = "application::articles::indexes";

/// Moves `id` to the front, drops duplicates and truncates to `limit`.
pub fn push_front(ids: &mut Vec<String>, id: &str, limit: usize) {
    ids.retain(|existing| existing != id);
    ids.insert(0, id.to_string());
    ids.truncate(limit);
}

/// De-duplicates (keeping the first occurrence) and truncates to `limit`.
/// Returns whether anything changed.
pub fn normalize(ids: &mut Vec<String>, limit: usize) -> bool {
    let before = ids.len();
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    ids.truncate(limit);
    ids.len() != before
}

pub(super) fn index_options(ttl: Duration, tag: String) -> SetOptions {
    SetOptions::default()
        .with_ttl(ttl)
        .with_tags([keys::INDEXES_TAG.to_string(), tag])
}

/// Prepends `id` to the index stored at `key`.
pub(super) async fn prepend(
    cache: &CacheManager,
    key: &str,
    id: &str,
    limit: usize,
    options: SetOptions,
) -> Result<bool, CacheError> {
    let mut ids = cache.get_value::<Vec<String>>(key).await?.unwrap_or_default();
    push_front(&mut ids, id, limit);
    debug!(target = SOURCE, key, id, len = ids.len(), "index updated");
    cache.set(key, &ids, options).await
}

/// Adds `member` to the registry at `key` if it is not already listed.
pub(super) async fn register(
    cache: &CacheManager,
    key: &str,
    member: &str,
    ttl: Duration,
) -> Result<bool, CacheError> {
    let mut members = cache.get_value::<Vec<String>>(key).await?.unwrap_or_default();
    if members.iter().any(|existing| existing == member) {
        return Ok(true);
    }
    members.push(member.to_string());
    let options = SetOptions::default()
        .with_ttl(ttl)
        .with_tags([keys::INDEXES_TAG]);
    cache.set(key, &members, options).await
}

/// Lifetime of category and author indexes: never shorter than the article
/// strategy, nor than the article just added.
pub(super) fn index_ttl(article_ttl: Duration) -> Duration {
    article_ttl.max(ContentClass::Article.strategy().base_ttl)
}

/// Registries outlive the indexes they list.
pub(super) fn registry_ttl(article_ttl: Duration) -> Duration {
    index_ttl(article_ttl).max(ContentClass::Category.strategy().base_ttl)
}

/// Reads the index at `key`, keeping its remaining lifetime and tags so a
/// rewrite does not extend it.
pub(super) async fn load_with_lifetime(
    cache: &CacheManager,
    key: &str,
    now: OffsetDateTime,
) -> Result<Option<(Vec<String>, SetOptions)>, CacheError> {
    let Some(entry) = cache.get::<Vec<String>>(key).await? else {
        return Ok(None);
    };
    let Some(remaining) = entry.metadata.remaining_ttl(now) else {
        return Ok(None);
    };
    let options = SetOptions::default()
        .with_ttl(remaining)
        .with_tags(entry.metadata.tags.iter().cloned())
        .with_priority(entry.metadata.priority);
    Ok(Some((entry.data, options)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn push_front_moves_existing_id_to_head() {
        let mut list = ids(&["3", "2", "1"]);
        push_front(&mut list, "1", 10);
        assert_eq!(list, ids(&["1", "3", "2"]));
    }

    #[test]
    fn push_front_truncates_from_the_tail() {
        let mut list = ids(&["3", "2", "1"]);
        push_front(&mut list, "4", 3);
        assert_eq!(list, ids(&["4", "3", "2"]));
    }

    #[test]
    fn normalize_reports_changes() {
        let mut list = ids(&["a", "b", "a", "c"]);
        assert!(normalize(&mut list, 2));
        assert_eq!(list, ids(&["a", "b"]));

        let mut clean = ids(&["a", "b"]);
        assert!(!normalize(&mut clean, 5));
    }

    #[test]
    fn index_lifetimes_respect_the_strategy() {
        assert_eq!(index_ttl(Duration::from_secs(300)), Duration::from_secs(3600));
        assert_eq!(index_ttl(Duration::from_secs(14_400)), Duration::from_secs(14_400));
        assert_eq!(registry_ttl(Duration::from_secs(300)), Duration::from_secs(7200));
    }
}
