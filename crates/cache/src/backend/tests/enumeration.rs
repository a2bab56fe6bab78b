use super::*;
use crate::config::EvictionMode;
use tempfile::TempDir;

#[tokio::test]
async fn entries_come_back_most_recent_first() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    for name in ["a", "b", "c"] {
        put(&cache, name, b"x").await;
    }
    assert_eq!(enumerate_keys(&cache).await, ["c", "b", "a"]);

    // Reopening an entry moves it ahead of the rest.
    cache.open_entry("a").await.unwrap().close();
    assert_eq!(enumerate_keys(&cache).await, ["a", "c", "b"]);
}

#[tokio::test]
async fn enumeration_leaves_entries_untouched() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    for name in ["a", "b", "c"] {
        put(&cache, name, b"x").await;
    }
    let before: Vec<_> = {
        let mut stamps = Vec::new();
        for name in ["a", "b", "c"] {
            let entry = cache.open_entry(name).await.unwrap();
            stamps.push((entry.last_used(), entry.last_modified()));
            entry.close();
        }
        stamps
    };
    let order_before = enumerate_keys(&cache).await;

    // Walking the cache must not change timestamps or recency order.
    let order_after = enumerate_keys(&cache).await;
    assert_eq!(order_before, order_after);
    for (name, stamp) in ["a", "b", "c"].iter().zip(&before) {
        let entry = cache.open_entry(name).await.unwrap();
        assert_eq!((entry.last_used(), entry.last_modified()), *stamp);
        entry.close();
    }
}

#[tokio::test]
async fn enumeration_covers_both_ranking_lists() {
    let dir = TempDir::new().unwrap();
    let cache = Backend::create(inline_config(&dir).eviction(EvictionMode::TwoList))
        .await
        .unwrap();

    put(&cache, "reused", b"x").await;
    put(&cache, "fresh", b"x").await;
    cache.open_entry("reused").await.unwrap().close();

    // Promoted entries first, then the never-reused list.
    assert_eq!(enumerate_keys(&cache).await, ["reused", "fresh"]);
}

#[tokio::test]
async fn dooming_the_current_entry_does_not_break_the_walk() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    for i in 0..10 {
        put(&cache, &format!("key {i}"), b"x").await;
    }

    let mut iter = cache.create_iterator();
    let mut seen = 0;
    while let Some(entry) = cache.open_next_entry(&mut iter).await.unwrap() {
        entry.doom().await;
        seen += 1;
    }
    assert_eq!(seen, 10);
    assert_eq!(cache.entry_count().await, 0);
}

#[tokio::test]
async fn opening_the_current_entry_mid_walk_keeps_the_cache_healthy() {
    let dir = TempDir::new().unwrap();
    let cache = Backend::create(inline_config(&dir).eviction(EvictionMode::TwoList))
        .await
        .unwrap();

    for name in ["a", "b", "c"] {
        put(&cache, name, b"x").await;
    }
    // "a" has a reuse history; "c" and "b" are still on the no-use list.
    cache.open_entry("a").await.unwrap().close();

    let mut iter = cache.create_iterator();
    let first = cache.open_next_entry(&mut iter).await.unwrap().unwrap();
    assert_eq!(first.key(), "a");
    first.close();
    let second = cache.open_next_entry(&mut iter).await.unwrap().unwrap();
    assert_eq!(second.key(), "c");
    second.close();

    // Reopening the entry the cursor is parked on promotes it out from
    // under the walk. The walk may stop early, but it must not fail and
    // the cache must stay intact.
    let held = cache.open_entry("c").await.unwrap();
    while let Some(entry) = cache.open_next_entry(&mut iter).await.unwrap() {
        entry.close();
    }
    held.close();

    cache.flush().await.unwrap();
    assert_eq!(cache.entry_count().await, 3);
    for name in ["a", "b", "c"] {
        cache.open_entry(name).await.unwrap().close();
    }
}

#[tokio::test]
async fn reopening_the_current_entry_does_not_disturb_a_single_list_walk() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    for name in ["a", "b", "c"] {
        put(&cache, name, b"x").await;
    }

    let mut iter = cache.create_iterator();
    let first = cache.open_next_entry(&mut iter).await.unwrap().unwrap();
    assert_eq!(first.key(), "c");
    first.close();
    let second = cache.open_next_entry(&mut iter).await.unwrap().unwrap();
    assert_eq!(second.key(), "b");
    second.close();

    // The reopen moves "b" to the list head behind the cursor.
    cache.open_entry("b").await.unwrap().close();
    let mut seen = Vec::new();
    while let Some(entry) = cache.open_next_entry(&mut iter).await.unwrap() {
        seen.push(entry.key().to_string());
        entry.close();
    }
    // The walk finishes without error and every entry survives.
    assert!(seen.len() <= 3);
    assert_eq!(cache.entry_count().await, 3);
}

#[tokio::test]
async fn entries_created_mid_walk_behind_the_cursor_are_skipped() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    put(&cache, "old", b"x").await;
    let mut iter = cache.create_iterator();
    let first = cache.open_next_entry(&mut iter).await.unwrap().unwrap();
    assert_eq!(first.key(), "old");
    first.close();

    // New entries go to the list head, which the cursor has passed.
    put(&cache, "new", b"x").await;
    assert!(cache.open_next_entry(&mut iter).await.unwrap().is_none());
}

#[tokio::test]
async fn ending_an_enumeration_is_final() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;
    put(&cache, "a", b"x").await;
    put(&cache, "b", b"x").await;

    let mut iter = cache.create_iterator();
    assert!(cache.open_next_entry(&mut iter).await.unwrap().is_some());
    cache.end_enumeration(&mut iter);
    assert!(cache.open_next_entry(&mut iter).await.unwrap().is_none());
    assert!(cache.open_next_entry(&mut iter).await.unwrap().is_none());
}
