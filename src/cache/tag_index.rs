//! Reverse index from tag to keys for the local adapter.
//!
//! Tracks tag → keys and key → tags so that invalidating a tag costs the size
//! of the tag rather than a scan of the store, and deleting a key can drop it
//! from every tag set it joined.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use time::OffsetDateTime;

use super::lock::{self, LockSite};

const SOURCE: &str = "cache::tag_index";

#[derive(Debug, Default)]
struct TagSet {
    keys: HashSet<String>,
    expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Default)]
struct Inner {
    tag_to_keys: HashMap<String, TagSet>,
    key_to_tags: HashMap<String, HashSet<String>>,
}

/// Bidirectional tag ↔ key mapping.
///
/// Each tag set carries an expiry that is never earlier than the expiry of
/// any key registered under it, so a tag cannot be forgotten while an entry
/// it should invalidate is still alive.
#[derive(Debug, Default)]
pub struct TagIndex {
    inner: RwLock<Inner>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under every tag, replacing any previous membership.
    pub fn register<'a, I>(&self, key: &str, tags: I, expires_at: OffsetDateTime)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut inner = lock::write(&self.inner, LockSite::new(SOURCE, "register"));
        detach(&mut inner, key);

        let tags: HashSet<String> = tags.into_iter().cloned().collect();
        if tags.is_empty() {
            return;
        }
        for tag in &tags {
            let set = inner.tag_to_keys.entry(tag.clone()).or_default();
            set.keys.insert(key.to_string());
            set.expires_at = Some(match set.expires_at {
                Some(current) if current > expires_at => current,
                _ => expires_at,
            });
        }
        inner.key_to_tags.insert(key.to_string(), tags);
    }

    /// Keys currently indexed under `tag`; an expired tag set reads as empty.
    pub fn keys_for_tag(&self, tag: &str, now: OffsetDateTime) -> HashSet<String> {
        let inner = lock::read(&self.inner, LockSite::new(SOURCE, "keys_for_tag"));
        match inner.tag_to_keys.get(tag) {
            Some(set) if set.expires_at.is_none_or(|at| at >= now) => set.keys.clone(),
            _ => HashSet::new(),
        }
    }

    pub fn tags_for_key(&self, key: &str) -> HashSet<String> {
        lock::read(&self.inner, LockSite::new(SOURCE, "tags_for_key"))
            .key_to_tags
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove a key from every tag set it belonged to.
    pub fn unregister(&self, key: &str) {
        let mut inner = lock::write(&self.inner, LockSite::new(SOURCE, "unregister"));
        detach(&mut inner, key);
    }

    /// Drop the tag set itself and return the keys it indexed.
    pub fn remove_tag(&self, tag: &str) -> HashSet<String> {
        let mut inner = lock::write(&self.inner, LockSite::new(SOURCE, "remove_tag"));
        let keys = inner
            .tag_to_keys
            .remove(tag)
            .map(|set| set.keys)
            .unwrap_or_default();
        for key in &keys {
            if let Some(tags) = inner.key_to_tags.get_mut(key) {
                tags.remove(tag);
                if tags.is_empty() {
                    inner.key_to_tags.remove(key);
                }
            }
        }
        keys
    }

    /// Drop references to keys for which `is_live` returns false, then any
    /// tag set that is expired or empty. Returns the number of dropped
    /// key-to-tag edges.
    pub fn prune<F>(&self, now: OffsetDateTime, mut is_live: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let mut inner = lock::write(&self.inner, LockSite::new(SOURCE, "prune"));
        let dead: Vec<String> = inner
            .key_to_tags
            .keys()
            .filter(|key| !is_live(key))
            .cloned()
            .collect();

        let mut dropped = 0;
        for key in &dead {
            dropped += detach(&mut inner, key);
        }

        let expired: Vec<String> = inner
            .tag_to_keys
            .iter()
            .filter(|(_, set)| set.keys.is_empty() || set.expires_at.is_some_and(|at| at < now))
            .map(|(tag, _)| tag.clone())
            .collect();
        for tag in expired {
            let Some(set) = inner.tag_to_keys.remove(&tag) else {
                continue;
            };
            for key in set.keys {
                if let Some(tags) = inner.key_to_tags.get_mut(&key) {
                    tags.remove(&tag);
                    if tags.is_empty() {
                        inner.key_to_tags.remove(&key);
                    }
                }
            }
        }
        dropped
    }

    pub fn clear(&self) {
        let mut inner = lock::write(&self.inner, LockSite::new(SOURCE, "clear"));
        inner.tag_to_keys.clear();
        inner.key_to_tags.clear();
    }

    pub fn tag_count(&self) -> usize {
        lock::read(&self.inner, LockSite::new(SOURCE, "tag_count"))
            .tag_to_keys
            .len()
    }

    pub fn key_count(&self) -> usize {
        lock::read(&self.inner, LockSite::new(SOURCE, "key_count"))
            .key_to_tags
            .len()
    }
}

/// Removes `key` from all of its tag sets; returns how many edges were cut.
fn detach(inner: &mut Inner, key: &str) -> usize {
    let Some(tags) = inner.key_to_tags.remove(key) else {
        return 0;
    };
    for tag in &tags {
        if let Some(set) = inner.tag_to_keys.get_mut(tag) {
            set.keys.remove(key);
            if set.keys.is_empty() {
                inner.tag_to_keys.remove(tag);
            }
        }
    }
    tags.len()
}
