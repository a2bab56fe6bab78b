//! Index file codec
//!
//! Layout: 4-byte magic `SCI1`, little-endian `u32` format version,
//! little-endian `u32` crc32c of the payload, then the bincode payload.

use crate::config::EvictionMode;
use crate::entry::NUM_STREAMS;
use crate::errors::{CacheError, Result};
use crate::rankings::ListId;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 4] = b"SCI1";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

/// Everything the backend persists about one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexNode {
    pub slot: u32,
    pub list: ListId,
    pub prev: u32,
    pub next: u32,
    pub key: String,
    pub hash: u64,
    pub id: u64,
    pub sizes: [u64; NUM_STREAMS],
    pub last_used_ms: u64,
    pub last_modified_ms: u64,
    /// Entry had open handles when the index was written. Dirty nodes are
    /// discarded when loading an unclean index.
    pub dirty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexPayload {
    /// Written `true` only by a graceful shutdown.
    pub clean: bool,
    pub eviction: EvictionMode,
    pub mask: u32,
    pub next_id: u64,
    pub heads: [u32; 2],
    pub tails: [u32; 2],
    pub nodes: Vec<IndexNode>,
}

pub(crate) enum LoadOutcome {
    /// No index file; a fresh cache.
    Missing,
    Loaded(IndexPayload),
    /// An index exists but cannot be decoded.
    Broken(&'static str),
}

pub(crate) fn load(path: &Path) -> LoadOutcome {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(_) => return LoadOutcome::Broken("unreadable"),
    };
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return LoadOutcome::Broken("bad magic");
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return LoadOutcome::Broken("unsupported version");
    }
    let crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let payload = &bytes[HEADER_LEN..];
    if crc32c::crc32c(payload) != crc {
        return LoadOutcome::Broken("checksum mismatch");
    }
    match bincode::deserialize(payload) {
        Ok(payload) => LoadOutcome::Loaded(payload),
        Err(_) => LoadOutcome::Broken("undecodable payload"),
    }
}

pub(crate) fn save(path: &Path, payload: &IndexPayload) -> Result<()> {
    let body = bincode::serialize(payload)
        .map_err(|e| CacheError::io(path, "encode index", std::io::Error::other(e)))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&crc32c::crc32c(&body).to_le_bytes());
    bytes.extend_from_slice(&body);
    write_atomic(path, &bytes)
}

/// Write to a temp file in the same directory, sync, then rename over the
/// destination so readers never observe a partial file.
pub(super) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| CacheError::io(parent, "create temp file", e))?;
    tmp.write_all(bytes)
        .map_err(|e| CacheError::io(tmp.path(), "write temp file", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CacheError::io(tmp.path(), "sync temp file", e))?;
    tmp.persist(path)
        .map_err(|e| CacheError::io(path, "rename into place", e.error))?;
    Ok(())
}
