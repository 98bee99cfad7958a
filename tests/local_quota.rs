use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use gazette::application::articles::{ArticleCacheConfig, ArticleCacheManager};
use gazette::cache::{
    CacheConfig, CacheManager, LocalAdapter, LocalTier, MemoryTier, SetOptions, SqliteTier,
};
use gazette::types::Article;
use time::OffsetDateTime;

const QUOTA_BYTES: u64 = 1024;

fn small_quota_cache() -> Arc<CacheManager> {
    quota_cache(Box::new(MemoryTier::new()))
}

fn quota_cache(tier: Box<dyn LocalTier>) -> Arc<CacheManager> {
    let config = CacheConfig::client_in_memory();
    let adapter = LocalAdapter::with_tier(
        tier,
        QUOTA_BYTES,
        config.default_ttl,
        &config.schema_version,
    );
    Arc::new(CacheManager::with_backend(Arc::new(adapter), &config))
}

fn article_with_body(id: &str, body_len: usize) -> Article {
    let published_at = OffsetDateTime::now_utc() - time::Duration::days(2);
    Article {
        id: id.to_string(),
        slug: format!("long-read-{id}"),
        title: "Long read".to_string(),
        summary: String::new(),
        content: "x".repeat(body_len),
        url: format!("https://news.example/{id}"),
        image_url: None,
        source: "wire".to_string(),
        category: "opinion".to_string(),
        author_id: "3".to_string(),
        author_name: "Columnist".to_string(),
        tags: Vec::new(),
        published_at,
        updated_at: published_at,
        view_count: 0,
        like_count: 0,
        comment_count: 0,
        is_trending: false,
        is_featured: false,
    }
}

#[tokio::test]
async fn oversized_article_is_dropped_without_error() {
    let cache = small_quota_cache();
    let articles = ArticleCacheManager::new(Arc::clone(&cache), ArticleCacheConfig::default());
    let before = cache.stats().await.expect("stats");

    let written = articles
        .cache_article(&article_with_body("900", 2048))
        .await
        .expect("quota overflow is not an error");
    assert!(!written);

    let after = cache.stats().await.expect("stats");
    assert_eq!(after.total_keys, before.total_keys);
    assert_eq!(after.dropped_writes, before.dropped_writes + 1);
    assert!(articles.get_article("900").await.expect("read").is_none());
    assert!(
        articles
            .get_article("long-read-900")
            .await
            .expect("read")
            .is_none()
    );
}

#[tokio::test]
async fn expired_entries_make_room_for_new_writes() {
    let cache = small_quota_cache();
    let filler = "y".repeat(400);

    assert!(
        cache
            .set(
                "filler",
                &filler,
                SetOptions::default().with_ttl(Duration::from_millis(20)),
            )
            .await
            .expect("write filler")
    );
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(
        cache
            .set("fresh", &filler, SetOptions::default())
            .await
            .expect("write fresh")
    );
    assert!(!cache.exists("filler").await.expect("exists"));
    assert_eq!(cache.stats().await.expect("stats").total_keys, 1);
}

#[tokio::test]
async fn used_memory_stays_within_quota() {
    let cache = small_quota_cache();
    for n in 0..20 {
        let _ = cache
            .set(&format!("k{n}"), &"z".repeat(100), SetOptions::default())
            .await
            .expect("write");
    }

    let stats = cache.stats().await.expect("stats");
    assert!(stats.used_memory <= QUOTA_BYTES, "used {}", stats.used_memory);
    assert!(stats.dropped_writes > 0);
}

async fn race_writers(cache: Arc<CacheManager>) {
    let body = "w".repeat(500);
    let writes = (0..3).map(|n| {
        let cache = Arc::clone(&cache);
        let body = body.clone();
        tokio::spawn(async move {
            cache
                .set(&format!("race:{n}"), &body, SetOptions::default())
                .await
                .expect("write")
        })
    });
    let admitted = join_all(writes)
        .await
        .into_iter()
        .map(|joined| joined.expect("writer task"))
        .filter(|written| *written)
        .count();

    let stats = cache.stats().await.expect("stats");
    assert_eq!(admitted, 1);
    assert_eq!(stats.total_keys, 1);
    assert_eq!(stats.dropped_writes, 2);
    assert!(stats.used_memory <= QUOTA_BYTES, "used {}", stats.used_memory);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_share_the_memory_quota() {
    race_writers(small_quota_cache()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_share_the_sqlite_quota() {
    let tier = SqliteTier::open(":memory:").await.expect("open sqlite");
    race_writers(quota_cache(Box::new(tier))).await;
}
