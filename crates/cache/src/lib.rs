//! stash-cache: a disk-backed, key-addressed cache
//!
//! Entries are named by arbitrary string keys and hold up to three
//! independent byte streams. The backend keeps an LRU-ordered index of
//! entries, evicts from the cold end when the configured capacity is
//! exceeded, and persists both the index and entry data so a cache
//! directory survives process restarts. Corrupt state is absorbed rather
//! than surfaced: damaged entries are dropped, a damaged index resets the
//! cache, and corruption found while entries are open disables the backend
//! until the handles are gone.
//!
//! ```no_run
//! use stash_cache::{Backend, BackendConfig};
//!
//! # async fn demo() -> stash_cache::Result<()> {
//! let cache = Backend::create(BackendConfig::new("/tmp/my-cache")).await?;
//! let entry = cache.create_entry("https://example.com/logo.png").await?;
//! entry.write_data(0, 0, b"bytes", false).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
mod entry;
mod errors;
mod hashing;
mod key_index;
mod rankings;
mod storage;

pub mod sizing;

pub use backend::{Backend, EntryIterator};
pub use config::{BackendConfig, CacheType, EvictionMode, ExecMode};
pub use entry::{Entry, NUM_STREAMS};
pub use errors::{CacheError, Result};
