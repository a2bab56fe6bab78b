use super::*;
use crate::config::{BackendConfig, ExecMode};
use crate::errors::CacheError;
use tempfile::TempDir;

#[tokio::test]
async fn create_write_and_read_back() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    let entry = cache.create_entry("the first key").await.unwrap();
    assert_eq!(entry.key(), "the first key");
    let written = entry
        .write_data(0, 0, b"And the data to save", false)
        .await
        .unwrap();
    assert_eq!(written, 20);
    assert_eq!(entry.data_size(0), 20);
    assert_eq!(entry.data_size(1), 0);
    entry.close();

    let entry = cache.open_entry("the first key").await.unwrap();
    assert_eq!(read_stream(&entry, 0).await, b"And the data to save");
    assert_eq!(cache.entry_count().await, 1);
}

#[tokio::test]
async fn streams_are_independent() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    let entry = cache.create_entry("k").await.unwrap();
    entry.write_data(0, 0, b"zero", false).await.unwrap();
    entry.write_data(1, 0, b"one!!", false).await.unwrap();
    entry.write_data(2, 0, b"two", false).await.unwrap();

    assert_eq!(read_stream(&entry, 0).await, b"zero");
    assert_eq!(read_stream(&entry, 1).await, b"one!!");
    assert_eq!(read_stream(&entry, 2).await, b"two");
}

#[tokio::test]
async fn sparse_write_zero_fills_and_truncate_cuts() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;
    let entry = cache.create_entry("k").await.unwrap();

    entry.write_data(0, 10, b"xy", false).await.unwrap();
    assert_eq!(entry.data_size(0), 12);
    let bytes = read_stream(&entry, 0).await;
    assert_eq!(&bytes[..10], &[0u8; 10]);
    assert_eq!(&bytes[10..], b"xy");

    entry.write_data(0, 2, b"ab", true).await.unwrap();
    assert_eq!(entry.data_size(0), 4);

    // Reading past the end returns nothing.
    let mut buf = [0u8; 8];
    assert_eq!(entry.read_data(0, 100, &mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn create_of_live_key_is_refused() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    let _entry = cache.create_entry("k").await.unwrap();
    match cache.create_entry("k").await {
        Err(CacheError::AlreadyExists { key }) => assert_eq!(key, "k"),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
}

#[tokio::test]
async fn open_of_missing_key_is_refused() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;
    match cache.open_entry("missing").await {
        Err(CacheError::NotFound { key }) => assert_eq!(key, "missing"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn open_handles_share_one_record() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    let first = cache.create_entry("k").await.unwrap();
    let second = cache.open_entry("k").await.unwrap();
    assert!(first.ptr_eq(&second));

    first.write_data(0, 0, b"shared", false).await.unwrap();
    assert_eq!(read_stream(&second, 0).await, b"shared");
}

#[tokio::test]
async fn keys_can_be_very_long() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    for len in [1023usize, 19999] {
        let key = "k".repeat(len);
        put(&cache, &key, b"payload").await;
        let entry = cache.open_entry(&key).await.unwrap();
        assert_eq!(entry.key().len(), len);
        entry.close();
    }
    assert_eq!(cache.entry_count().await, 2);
}

#[tokio::test]
async fn random_payloads_round_trip() {
    use rand::{Rng, SeedableRng};

    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

    let mut payloads = Vec::new();
    for i in 0..20 {
        let len = rng.gen_range(1..4096);
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        put(&cache, &format!("key {i}"), &data).await;
        payloads.push(data);
    }
    for (i, expected) in payloads.iter().enumerate() {
        let entry = cache.open_entry(&format!("key {i}")).await.unwrap();
        assert_eq!(&read_stream(&entry, 0).await, expected);
        entry.close();
    }
}

#[tokio::test]
async fn keys_are_case_sensitive() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;
    put(&cache, "Key", b"upper").await;
    assert!(cache.open_entry("key").await.is_err());
}

#[tokio::test]
async fn collisions_resolve_with_a_tiny_table() {
    let dir = TempDir::new().unwrap();
    // A one-bucket key index forces every key onto one chain.
    let cache = Backend::create(inline_config(&dir).index_mask(0))
        .await
        .unwrap();

    for i in 0..50 {
        put(&cache, &format!("some key {i}"), format!("data {i}").as_bytes()).await;
    }
    for i in 0..50 {
        let entry = cache.open_entry(&format!("some key {i}")).await.unwrap();
        assert_eq!(read_stream(&entry, 0).await, format!("data {i}").as_bytes());
        entry.close();
    }
}

#[tokio::test]
async fn backends_at_distinct_paths_are_independent() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = inline_backend(&dir_a).await;
    let b = inline_backend(&dir_b).await;

    put(&a, "k", b"from a").await;
    put(&b, "k", b"from b").await;

    let entry = a.open_entry("k").await.unwrap();
    assert_eq!(read_stream(&entry, 0).await, b"from a");
    entry.close();

    a.doom_entry("k").await.unwrap();
    assert_eq!(b.entry_count().await, 1);
}

#[tokio::test]
async fn memory_backend_needs_no_directory() {
    let cache = Backend::create(BackendConfig::in_memory().exec(ExecMode::Inline))
        .await
        .unwrap();
    put(&cache, "k", b"bytes").await;
    let entry = cache.open_entry("k").await.unwrap();
    assert_eq!(read_stream(&entry, 0).await, b"bytes");
}

#[tokio::test]
async fn background_executor_serves_the_same_api() {
    let dir = TempDir::new().unwrap();
    let cache = Backend::create(BackendConfig::new(dir.path())).await.unwrap();

    let entry = cache.create_entry("k").await.unwrap();
    entry.write_data(0, 0, b"bytes", false).await.unwrap();
    entry.close();

    let entry = cache.open_entry("k").await.unwrap();
    assert_eq!(read_stream(&entry, 0).await, b"bytes");
    entry.doom().await;
    assert_eq!(cache.entry_count().await, 0);
}

#[tokio::test]
async fn handles_outlive_a_dropped_backend() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    let entry = cache.create_entry("k").await.unwrap();
    entry.write_data(0, 0, b"before", false).await.unwrap();
    drop(cache);

    // Stream I/O goes through the record, not the backend, so the handle
    // keeps working; backend-side bookkeeping is simply gone.
    assert_eq!(read_stream(&entry, 0).await, b"before");
    entry.write_data(0, 6, b" and after", false).await.unwrap();
    assert_eq!(read_stream(&entry, 0).await, b"before and after");

    // Operations that would ask the backend resolve instead of hanging.
    entry.doom().await;
    entry.close();
}

#[tokio::test]
async fn handles_outlive_a_dropped_background_backend() {
    let dir = TempDir::new().unwrap();
    let cache = Backend::create(BackendConfig::new(dir.path())).await.unwrap();

    let entry = cache.create_entry("k").await.unwrap();
    entry.write_data(0, 0, b"bytes", false).await.unwrap();
    drop(cache);
    tokio::task::yield_now().await;

    assert_eq!(read_stream(&entry, 0).await, b"bytes");
    entry.doom().await;
}

#[tokio::test]
async fn cache_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let cache = inline_backend(&dir).await;
        put(&cache, "k1", b"first").await;
        put(&cache, "k2", b"second").await;
    }

    let cache = inline_backend(&dir).await;
    assert_eq!(cache.entry_count().await, 2);
    let entry = cache.open_entry("k1").await.unwrap();
    assert_eq!(read_stream(&entry, 0).await, b"first");
}

#[tokio::test]
async fn timestamps_move_with_use() {
    let dir = TempDir::new().unwrap();
    let cache = inline_backend(&dir).await;

    let entry = cache.create_entry("k").await.unwrap();
    let created_used = entry.last_used();
    let created_modified = entry.last_modified();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    entry.write_data(0, 0, b"x", false).await.unwrap();
    assert!(entry.last_modified() > created_modified);
    assert!(entry.last_used() > created_used);

    let after_write = entry.last_modified();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let mut buf = [0u8; 1];
    entry.read_data(0, 0, &mut buf).await.unwrap();
    assert!(entry.last_used() > after_write);
    assert_eq!(entry.last_modified(), after_write);
}

#[tokio::test]
async fn garbage_index_fails_creation() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("index"), b"not an index").unwrap();

    match Backend::create(inline_config(&dir)).await {
        Err(CacheError::Init { .. }) => {}
        other => panic!("expected Init error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn garbage_index_is_discarded_on_request() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("index"), b"not an index").unwrap();

    let cache = Backend::create(inline_config(&dir).reset_on_error(true))
        .await
        .unwrap();
    assert_eq!(cache.entry_count().await, 0);
    put(&cache, "k", b"fresh").await;
    assert_eq!(cache.entry_count().await, 1);
}
