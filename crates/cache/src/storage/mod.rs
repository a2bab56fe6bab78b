//! Persistent storage for disk-backed backends
//!
//! Two kinds of files: one `index` per cache directory holding the backend
//! geometry, the ranking links, and per-entry metadata; and one data file
//! per entry holding its streams. Both carry a magic, a version, and a
//! crc32c over the payload, and both are replaced atomically (write to a
//! temp name, then rename).

mod data;
mod index_file;

pub(crate) use index_file::{IndexNode, IndexPayload, LoadOutcome};

use crate::errors::{CacheError, Result};
use crate::entry::NUM_STREAMS;
use std::path::{Path, PathBuf};

pub(crate) struct DiskStore {
    base: PathBuf,
}

impl DiskStore {
    const ENTRIES_DIR: &'static str = "entries";

    /// Open (creating directories as needed) the store at `base`.
    pub fn open(base: &Path) -> Result<Self> {
        let store = Self {
            base: base.to_path_buf(),
        };
        match std::fs::create_dir_all(store.entries_dir()) {
            Ok(()) => Ok(store),
            Err(e) => Err(CacheError::io(base, "create cache directory", e)),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.base.join("index")
    }

    fn entries_dir(&self) -> PathBuf {
        self.base.join(Self::ENTRIES_DIR)
    }

    fn entry_path(&self, id: u64) -> PathBuf {
        self.entries_dir().join(format!("d_{id:016x}"))
    }

    /// Parse the on-disk index, distinguishing "no cache here yet" from
    /// "there is an index but it cannot be trusted".
    pub fn load_index(&self) -> LoadOutcome {
        index_file::load(&self.index_path())
    }

    pub fn write_index(&self, payload: &IndexPayload) -> Result<()> {
        index_file::save(&self.index_path(), payload)
    }

    /// Read an entry's streams. Any corruption (missing file, bad magic,
    /// checksum mismatch) reads as absent; the caller self-heals.
    pub fn read_entry(&self, id: u64) -> Option<[Vec<u8>; NUM_STREAMS]> {
        data::load(&self.entry_path(id))
    }

    pub fn write_entry(&self, id: u64, streams: &[Vec<u8>; NUM_STREAMS]) -> Result<()> {
        data::save(&self.entry_path(id), streams)
    }

    pub fn remove_entry(&self, id: u64) {
        let _ = std::fs::remove_file(self.entry_path(id));
    }

    /// Discard all persisted state and recreate an empty store.
    pub fn wipe(&self) -> Result<()> {
        let _ = std::fs::remove_file(self.index_path());
        let _ = std::fs::remove_dir_all(self.entries_dir());
        match std::fs::create_dir_all(self.entries_dir()) {
            Ok(()) => Ok(()),
            Err(e) => Err(CacheError::io(&self.base, "recreate cache directory", e)),
        }
    }

    /// Free space on the volume holding the cache, for automatic sizing.
    pub fn available_space(&self) -> Option<i64> {
        fs2::available_space(&self.base)
            .ok()
            .map(|bytes| bytes.min(i64::MAX as u64) as i64)
    }
}
