//! Cache entries
//!
//! `EntryRecord` is the authoritative in-memory record, owned by the
//! backend through the ranking arena. `Entry` is the reference-counted
//! handle callers hold; every handle to the same live key shares one
//! record. Stream I/O operates directly on the record so that handles keep
//! working even after the backend is disabled or dropped; bookkeeping
//! (recency, sizes, eviction) is reported to the backend asynchronously.

use crate::backend::{Command, CoreHandle, Limits};
use crate::errors::{CacheError, Result};
use crate::rankings::SlotKey;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Independently addressable data streams per entry.
pub const NUM_STREAMS: usize = 3;

pub(crate) struct EntryData {
    pub streams: [Vec<u8>; NUM_STREAMS],
    /// Stream bytes are resident. Entries reconstructed from the index
    /// stay unloaded until first opened.
    pub loaded: bool,
    pub sizes: [u64; NUM_STREAMS],
    pub last_used: SystemTime,
    pub last_modified: SystemTime,
    pub doomed: bool,
}

pub(crate) struct EntryRecord {
    key: String,
    hash: u64,
    id: u64,
    open_count: AtomicU32,
    /// Position in the ranking arena; `None` once doomed/unlinked.
    /// Written only by the backend.
    pub(crate) location: Mutex<Option<SlotKey>>,
    pub(crate) data: Mutex<EntryData>,
}

impl EntryRecord {
    pub fn new(key: String, hash: u64, id: u64) -> Self {
        let now = SystemTime::now();
        Self {
            key,
            hash,
            id,
            open_count: AtomicU32::new(0),
            location: Mutex::new(None),
            data: Mutex::new(EntryData {
                streams: Default::default(),
                loaded: true,
                sizes: [0; NUM_STREAMS],
                last_used: now,
                last_modified: now,
                doomed: false,
            }),
        }
    }

    /// Rebuild a record from persisted metadata; stream data stays on disk.
    pub fn from_index(
        key: String,
        hash: u64,
        id: u64,
        sizes: [u64; NUM_STREAMS],
        last_used: SystemTime,
        last_modified: SystemTime,
    ) -> Self {
        Self {
            key,
            hash,
            id,
            open_count: AtomicU32::new(0),
            location: Mutex::new(None),
            data: Mutex::new(EntryData {
                streams: Default::default(),
                loaded: false,
                sizes,
                last_used,
                last_modified,
                doomed: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register one more handle; returns the new count.
    pub fn acquire(&self) -> u32 {
        self.open_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one handle; returns the remaining count.
    pub fn release(&self) -> u32 {
        self.open_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::Acquire)
    }
}

/// A handle to a live cache entry.
///
/// Handles are reference counted: `create` and every subsequent `open` of
/// the same key return handles to the same record while any handle is
/// outstanding ([`Entry::ptr_eq`]). The entry's storage is released only
/// when the last handle is closed and the entry is doomed or evicted.
pub struct Entry {
    record: Arc<EntryRecord>,
    core: CoreHandle,
    limits: Arc<Limits>,
    closed: bool,
}

impl Entry {
    pub(crate) fn new(record: Arc<EntryRecord>, core: CoreHandle, limits: Arc<Limits>) -> Self {
        Self {
            record,
            core,
            limits,
            closed: false,
        }
    }

    pub fn key(&self) -> &str {
        self.record.key()
    }

    pub fn last_used(&self) -> SystemTime {
        self.record.data.lock().last_used
    }

    pub fn last_modified(&self) -> SystemTime {
        self.record.data.lock().last_modified
    }

    /// Current size of one stream in bytes.
    pub fn data_size(&self, stream: usize) -> usize {
        assert!(stream < NUM_STREAMS, "stream index out of range");
        self.record.data.lock().sizes[stream] as usize
    }

    /// Whether two handles refer to the same in-memory entry.
    pub fn ptr_eq(&self, other: &Entry) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }

    /// Read up to `buf.len()` bytes from `stream` at `offset`. Returns the
    /// number of bytes read; reading past the end yields 0. Updates
    /// `last_used`.
    pub async fn read_data(&self, stream: usize, offset: usize, buf: &mut [u8]) -> Result<usize> {
        assert!(stream < NUM_STREAMS, "stream index out of range");
        let read = {
            let mut data = self.record.data.lock();
            let size = data.sizes[stream] as usize;
            if offset >= size || buf.is_empty() {
                0
            } else {
                let n = buf.len().min(size - offset);
                buf[..n].copy_from_slice(&data.streams[stream][offset..offset + n]);
                data.last_used = SystemTime::now();
                n
            }
        };
        self.core.notify(Command::Touch {
            record: self.record.clone(),
            delta: 0,
        });
        Ok(read)
    }

    /// Write `buf` to `stream` at `offset`, zero-filling any gap. With
    /// `truncate` the stream is cut to exactly `offset + buf.len()` bytes.
    /// A write that would push the stream past the per-entry budget
    /// (`max_size / 8`) is rejected whole with `CapacityExceeded`. Updates
    /// both timestamps.
    pub async fn write_data(
        &self,
        stream: usize,
        offset: usize,
        buf: &[u8],
        truncate: bool,
    ) -> Result<usize> {
        assert!(stream < NUM_STREAMS, "stream index out of range");
        let end = offset + buf.len();
        let limit = self.limits.max_file_size();
        if end as i64 > limit {
            return Err(CacheError::CapacityExceeded {
                requested: end as i64,
                limit,
            });
        }

        let delta = {
            let mut data = self.record.data.lock();
            let old_size = data.sizes[stream] as i64;
            let bytes = &mut data.streams[stream];
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[offset..end].copy_from_slice(buf);
            if truncate {
                bytes.truncate(end);
            }
            let new_size = bytes.len() as u64;
            data.sizes[stream] = new_size;
            let now = SystemTime::now();
            data.last_used = now;
            data.last_modified = now;
            new_size as i64 - old_size
        };

        self.core.notify(Command::Touch {
            record: self.record.clone(),
            delta,
        });
        Ok(buf.len())
    }

    /// Doom this entry: it stops being discoverable by key immediately;
    /// its storage is released once the last handle closes. Dooming an
    /// already-doomed entry is a no-op.
    pub async fn doom(&self) {
        let (reply, done) = tokio::sync::oneshot::channel();
        self.core.submit(Command::DoomHandle {
            record: self.record.clone(),
            reply,
        });
        let _ = done.await;
    }

    /// Release this handle. Also happens on drop; calling `close` makes
    /// the release explicit at a sequencing point the caller controls.
    pub fn close(mut self) {
        self.closed = true;
        self.core.notify(Command::CloseHandle {
            record: self.record.clone(),
        });
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        if !self.closed {
            self.core.notify(Command::CloseHandle {
                record: self.record.clone(),
            });
        }
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.record.data.lock();
        f.debug_struct("Entry")
            .field("key", &self.record.key())
            .field("sizes", &data.sizes)
            .field("doomed", &data.doomed)
            .finish()
    }
}
