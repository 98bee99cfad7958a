use std::sync::Arc;
use std::time::Duration;

use gazette::application::articles::{
    ArticleCacheConfig, ArticleCacheManager, PopularityAggregate, RankingEntry,
};
use gazette::cache::{CacheConfig, CacheManager, keys};
use gazette::types::Article;
use time::OffsetDateTime;

async fn article_cache() -> (Arc<CacheManager>, ArticleCacheManager) {
    let cache = Arc::new(
        CacheManager::connect(&CacheConfig::client_in_memory())
            .await
            .expect("in-memory cache should open"),
    );
    let articles = ArticleCacheManager::new(Arc::clone(&cache), ArticleCacheConfig::default());
    (cache, articles)
}

fn article(id: &str, category: &str, author_id: &str, age: time::Duration) -> Article {
    let published_at = OffsetDateTime::now_utc() - age;
    Article {
        id: id.to_string(),
        slug: format!("story-{id}"),
        title: format!("Story {id}"),
        summary: "A short summary.".to_string(),
        content: "Body text.".to_string(),
        url: format!("https://news.example/{id}"),
        image_url: None,
        source: "wire".to_string(),
        category: category.to_string(),
        author_id: author_id.to_string(),
        author_name: format!("Author {author_id}"),
        tags: vec!["world".to_string()],
        published_at,
        updated_at: published_at,
        view_count: 0,
        like_count: 0,
        comment_count: 0,
        is_trending: false,
        is_featured: false,
    }
}

fn ids(articles: &[Article]) -> Vec<&str> {
    articles.iter().map(|a| a.id.as_str()).collect()
}

#[tokio::test]
async fn article_resolves_by_id_and_slug() {
    let (_, articles) = article_cache().await;
    let story = article("101", "technology", "42", time::Duration::days(2));

    assert!(articles.cache_article(&story).await.expect("cache article"));

    let by_id = articles.get_article("101").await.expect("read by id");
    let by_slug = articles.get_article("story-101").await.expect("read by slug");
    assert_eq!(by_id.as_ref(), Some(&story));
    assert_eq!(by_slug, by_id);

    let metadata = articles
        .get_article_metadata("101")
        .await
        .expect("read metadata")
        .expect("metadata cached");
    assert_eq!(metadata.title, story.title);
}

#[tokio::test]
async fn numeric_identifiers_are_not_treated_as_slugs() {
    let (cache, articles) = article_cache().await;
    cache
        .set(
            &keys::article_slug_key("2024"),
            &"101".to_string(),
            Default::default(),
        )
        .await
        .expect("write slug mapping");
    articles
        .cache_article(&article("101", "world", "1", time::Duration::days(2)))
        .await
        .expect("cache article");

    assert!(articles.get_article("2024").await.expect("read").is_none());
}

#[tokio::test]
async fn breaking_article_gets_the_short_ttl() {
    let (cache, articles) = article_cache().await;
    let mut story = article("7", "breaking", "3", time::Duration::minutes(30));
    story.view_count = 50_000;

    assert!(articles.cache_article(&story).await.expect("cache article"));

    let entry = cache
        .get::<Article>(&keys::article_key("7"))
        .await
        .expect("read entry")
        .expect("entry cached");
    let ttl = entry.metadata.expires_at - entry.metadata.created_at;
    assert_eq!(ttl, time::Duration::seconds(300));
}

#[tokio::test]
async fn category_index_is_bounded_and_keeps_the_latest() {
    let (_, articles) = article_cache().await;
    for n in 1..=105 {
        let story = article(&n.to_string(), "Politics", "9", time::Duration::days(2));
        assert!(articles.cache_article(&story).await.expect("cache article"));
    }

    let listed = articles
        .get_articles_by_category("politics", 500)
        .await
        .expect("read category");
    assert_eq!(listed.len(), 100);
    assert_eq!(listed[0].id, "105");
    assert!(listed.iter().all(|a| a.id != "5"));
}

#[tokio::test]
async fn category_listing_is_most_recent_first() {
    let (_, articles) = article_cache().await;
    for (id, hours) in [("s1", 30), ("s2", 20), ("s3", 10)] {
        let story = article(id, "science", "5", time::Duration::hours(hours));
        assert!(articles.cache_article(&story).await.expect("cache article"));
    }

    let listed = articles
        .get_articles_by_category("science", 5)
        .await
        .expect("read category");
    assert_eq!(ids(&listed), vec!["s3", "s2", "s1"]);

    let limited = articles
        .get_articles_by_category("science", 2)
        .await
        .expect("read category");
    assert_eq!(ids(&limited), vec!["s3", "s2"]);
}

#[tokio::test]
async fn author_invalidation_drops_only_that_author() {
    let (cache, articles) = article_cache().await;
    for (id, author) in [("a1", "42"), ("a2", "42"), ("b1", "7")] {
        let story = article(id, "business", author, time::Duration::days(2));
        assert!(articles.cache_article(&story).await.expect("cache article"));
    }

    let removed = cache
        .invalidate_by_tags(&["author:42".to_string()])
        .await
        .expect("invalidate");
    assert!(removed >= 6, "removed only {removed} entries");

    assert!(articles.get_article("a1").await.expect("read").is_none());
    assert!(articles.get_article("story-a2").await.expect("read").is_none());
    assert!(articles.get_article("b1").await.expect("read").is_some());
    assert!(
        articles
            .get_articles_by_author("42", 10)
            .await
            .expect("read author")
            .is_empty()
    );
    assert_eq!(
        ids(&articles
            .get_articles_by_author("7", 10)
            .await
            .expect("read author")),
        vec!["b1"]
    );
}

#[tokio::test]
async fn trending_articles_are_indexed() {
    let (_, articles) = article_cache().await;
    let mut hot = article("t1", "sports", "8", time::Duration::days(3));
    hot.is_trending = true;
    let cold = article("t2", "sports", "8", time::Duration::days(3));

    articles.cache_article(&hot).await.expect("cache article");
    articles.cache_article(&cold).await.expect("cache article");

    let trending = articles.get_trending_articles(10).await.expect("read trending");
    assert_eq!(ids(&trending), vec!["t1"]);
}

#[tokio::test]
async fn maintenance_drops_vanished_articles_and_syncs_ranking() {
    let (cache, articles) = article_cache().await;
    for id in ["m1", "m2"] {
        let story = article(id, "health", "11", time::Duration::days(2));
        assert!(articles.cache_article(&story).await.expect("cache article"));
        assert!(articles.get_article(id).await.expect("read").is_some());
    }

    assert!(cache.delete(&keys::article_key("m2")).await.expect("delete"));

    let report = articles.perform_maintenance().await.expect("maintenance");
    assert_eq!(report.index_ids_dropped, 2);
    assert_eq!(report.metrics_pruned, 1);
    assert_eq!(report.ranked, 1);

    let listed = articles
        .get_articles_by_category("health", 10)
        .await
        .expect("read category");
    assert_eq!(ids(&listed), vec!["m1"]);

    let ranking = cache
        .get_value::<Vec<RankingEntry>>(keys::POPULARITY_RANKING_KEY)
        .await
        .expect("read ranking")
        .expect("ranking cached");
    assert_eq!(ranking.len(), 1);
    assert_eq!(ranking[0].article_id, "m1");
    assert!(ranking[0].score > 0.0);

    let summary = cache
        .get_value::<PopularityAggregate>(keys::POPULARITY_AGGREGATE_KEY)
        .await
        .expect("read aggregate")
        .expect("aggregate cached");
    assert_eq!(summary.tracked, 1);
    assert_eq!(summary.top, vec!["m1".to_string()]);
    assert!(
        !cache
            .exists(&keys::article_metrics_key("m2"))
            .await
            .expect("exists")
    );
}

#[tokio::test]
async fn background_maintenance_keeps_running_until_aborted() {
    let (_, articles) = article_cache().await;
    let articles = Arc::new(articles);
    let handle = articles.spawn_maintenance(Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!handle.is_finished());

    handle.abort();
    assert!(handle.await.expect_err("aborted").is_cancelled());
}

#[tokio::test]
async fn separator_identifiers_never_reach_projection_keys() {
    let (cache, articles) = article_cache().await;
    let story = article("7", "world", "1", time::Duration::days(2));
    assert!(articles.cache_article(&story).await.expect("cache article"));

    assert!(articles.get_article("meta:7").await.expect("read").is_none());
    assert!(articles.get_article("slug:story-7").await.expect("read").is_none());
    assert!(
        cache
            .exists(&keys::article_metadata_key("7"))
            .await
            .expect("exists")
    );
    assert!(
        cache
            .exists(&keys::article_slug_key("story-7"))
            .await
            .expect("exists")
    );

    let mut bad = article("x:1", "world", "1", time::Duration::days(2));
    bad.slug = "x-1".to_string();
    assert!(!articles.cache_article(&bad).await.expect("refused"));
}
