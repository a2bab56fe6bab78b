//! Core error types for the cache engine

use std::path::PathBuf;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error type for cache operations.
///
/// Logical errors (`NotFound`, `AlreadyExists`, `CapacityExceeded`) are
/// expected, recoverable conditions. Structural corruption of a live backend
/// is never reported through this type; the backend absorbs it by dropping
/// entries, resetting, or disabling itself. Only an index that cannot be
/// parsed at startup surfaces as `Init`.
#[derive(Debug)]
pub enum CacheError {
    /// The key does not name a live entry (absent, doomed, or the backend is
    /// disabled).
    NotFound { key: String },

    /// A live entry with this key already exists.
    AlreadyExists { key: String },

    /// I/O error while touching the persistent store.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
    },

    /// The on-disk index could not be parsed at startup.
    Init { path: PathBuf, reason: String },

    /// A single write would push a stream past the per-entry budget.
    /// The write is rejected without being partially applied.
    CapacityExceeded { requested: i64, limit: i64 },

    /// The request was abandoned before the backend could complete it.
    Cancelled { operation: &'static str },
}

impl CacheError {
    pub(crate) fn io(path: &std::path::Path, operation: &'static str, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            operation,
            source,
        }
    }

    /// True for conditions a caller is expected to handle in normal operation.
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::AlreadyExists { .. } | Self::CapacityExceeded { .. }
        )
    }
}
