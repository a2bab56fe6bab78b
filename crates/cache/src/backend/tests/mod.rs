//! Behavioral tests for the backend
//!
//! Most tests run `ExecMode::Inline` so that deferred work (eviction,
//! restarts) only happens at `flush`, making assertions deterministic.

mod basic;
mod enumeration;

use crate::backend::Backend;
use crate::config::{BackendConfig, ExecMode};
use crate::entry::Entry;
use tempfile::TempDir;

fn inline_config(dir: &TempDir) -> BackendConfig {
    BackendConfig::new(dir.path()).exec(ExecMode::Inline)
}

async fn inline_backend(dir: &TempDir) -> Backend {
    Backend::create(inline_config(dir)).await.unwrap()
}

/// Create an entry, fill stream 0, and close it.
async fn put(cache: &Backend, key: &str, bytes: &[u8]) {
    let entry = cache.create_entry(key).await.unwrap();
    entry.write_data(0, 0, bytes, false).await.unwrap();
    entry.close();
}

/// Read all of stream 0.
async fn read_stream(entry: &Entry, stream: usize) -> Vec<u8> {
    let mut buf = vec![0u8; entry.data_size(stream)];
    let n = entry.read_data(stream, 0, &mut buf).await.unwrap();
    buf.truncate(n);
    buf
}

/// Collect every key visible to an enumeration, in order.
async fn enumerate_keys(cache: &Backend) -> Vec<String> {
    let mut iter = cache.create_iterator();
    let mut keys = Vec::new();
    while let Some(entry) = cache.open_next_entry(&mut iter).await.unwrap() {
        keys.push(entry.key().to_string());
    }
    keys
}
