use std::time::Duration;

use gazette::cache::{CacheConfig, CacheManager, LocalConfig, SetOptions};
use tempfile::TempDir;

fn sqlite_config(dir: &TempDir) -> CacheConfig {
    let database = dir.path().join("gazette-cache");
    CacheConfig {
        local: LocalConfig {
            database_name: database.to_string_lossy().into_owned(),
            structured: true,
            ..LocalConfig::default()
        },
        ..CacheConfig::client_in_memory()
    }
}

#[tokio::test]
async fn structured_tier_is_selected_when_available() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cache = CacheManager::connect(&sqlite_config(&dir))
        .await
        .expect("open cache");

    assert_eq!(cache.backend_name(), "sqlite");
    assert!(dir.path().join("gazette-cache.sqlite3").exists());
}

#[tokio::test]
async fn entries_and_tags_survive_a_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = sqlite_config(&dir);

    {
        let cache = CacheManager::connect(&config).await.expect("open cache");
        let tagged = SetOptions::default()
            .with_ttl(Duration::from_secs(600))
            .with_tags(["author:42"]);
        assert!(
            cache
                .set("article:1", &"first".to_string(), tagged.clone())
                .await
                .expect("write")
        );
        assert!(
            cache
                .set("article:2", &"second".to_string(), tagged)
                .await
                .expect("write")
        );
        assert!(
            cache
                .set("article:3", &"third".to_string(), SetOptions::default())
                .await
                .expect("write")
        );
    }

    let reopened = CacheManager::connect(&config).await.expect("reopen cache");
    assert_eq!(
        reopened
            .get_value::<String>("article:1")
            .await
            .expect("read")
            .as_deref(),
        Some("first")
    );

    let removed = reopened
        .invalidate_by_tags(&["author:42".to_string()])
        .await
        .expect("invalidate");
    assert_eq!(removed, 2);
    assert!(!reopened.exists("article:2").await.expect("exists"));
    assert!(reopened.exists("article:3").await.expect("exists"));
}

#[tokio::test]
async fn prefix_clear_only_touches_matching_keys() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cache = CacheManager::connect(&sqlite_config(&dir))
        .await
        .expect("open cache");

    for key in ["search:a", "search:b", "article:1"] {
        cache
            .set(key, &key.to_string(), SetOptions::default())
            .await
            .expect("write");
    }

    assert_eq!(cache.clear(Some("search:")).await.expect("clear"), 2);
    assert_eq!(cache.stats().await.expect("stats").total_keys, 1);
    assert!(cache.exists("article:1").await.expect("exists"));
}
