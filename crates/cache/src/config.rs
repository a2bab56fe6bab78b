//! Backend configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the cache is used for. The on-disk layout is identical for all
/// variants; the type is recorded so distinct caches (e.g. a general store
/// and a media store) never share a directory by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    Disk,
    Memory,
    Media,
}

/// Ranking-list layout used for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionMode {
    /// One recency list; eviction walks from the tail.
    SingleList,
    /// A primary list plus a low-priority "no use" list. New entries start
    /// on the no-use list and are promoted when reopened; eviction drains
    /// the no-use tail first so damaged or never-reused entries do not
    /// crowd out entries with a track record.
    TwoList,
}

/// Where operations execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// A dedicated task owns all backend state; callers complete
    /// asynchronously.
    Background,
    /// Operations run inline on the caller, and deferred work (eviction,
    /// restarts) only runs when `flush` is called. Deterministic; meant for
    /// tests.
    Inline,
}

/// Configuration for a cache backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Cache directory. `None` selects a pure in-memory backend.
    pub path: Option<PathBuf>,
    pub cache_type: CacheType,
    /// Maximum cache size in bytes; 0 picks a size from the available disk
    /// space (see `sizing`).
    pub max_size: i64,
    /// Discard an unreadable on-disk index and start empty instead of
    /// failing backend creation.
    pub reset_on_error: bool,
    pub eviction: EvictionMode,
    pub exec: ExecMode,
    /// Bucket mask for the key index, a power of two minus one. `None`
    /// selects the default table size. Small masks stay correct under load
    /// but degrade lookups to chain scans.
    pub index_mask: Option<u32>,
    /// Structurally validate the ranking lists while opening the backend.
    /// Disabled by crash-recovery tests that need to exercise the runtime
    /// corruption paths.
    pub validate_on_open: bool,
    /// Test hook: make the post-disable restart fail, leaving the backend
    /// permanently disabled.
    pub(crate) fail_restart: bool,
}

impl BackendConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            cache_type: CacheType::Disk,
            ..Self::in_memory()
        }
    }

    /// Configuration for a backend with no persistent storage.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            cache_type: CacheType::Memory,
            max_size: 0,
            reset_on_error: false,
            eviction: EvictionMode::SingleList,
            exec: ExecMode::Background,
            index_mask: None,
            validate_on_open: true,
            fail_restart: false,
        }
    }

    pub fn max_size(mut self, bytes: i64) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn eviction(mut self, mode: EvictionMode) -> Self {
        self.eviction = mode;
        self
    }

    pub fn exec(mut self, mode: ExecMode) -> Self {
        self.exec = mode;
        self
    }

    pub fn reset_on_error(mut self, reset: bool) -> Self {
        self.reset_on_error = reset;
        self
    }

    pub fn index_mask(mut self, mask: u32) -> Self {
        debug_assert!((mask + 1).is_power_of_two(), "mask must be 2^n - 1");
        self.index_mask = Some(mask);
        self
    }

    pub(crate) fn is_memory_only(&self) -> bool {
        self.path.is_none() || self.cache_type == CacheType::Memory
    }
}
