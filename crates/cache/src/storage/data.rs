//! Entry data file codec
//!
//! Layout mirrors the index file: 4-byte magic `SCD1`, little-endian `u32`
//! format version, little-endian `u32` crc32c of the payload, then the
//! bincode-encoded streams. Corruption is not an error at this layer; a
//! file that fails any check simply does not load, and the backend dooms
//! the entry.

use crate::entry::NUM_STREAMS;
use crate::errors::{CacheError, Result};
use std::path::Path;

const MAGIC: &[u8; 4] = b"SCD1";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

pub(super) fn load(path: &Path) -> Option<[Vec<u8>; NUM_STREAMS]> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return None;
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return None;
    }
    let crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let payload = &bytes[HEADER_LEN..];
    if crc32c::crc32c(payload) != crc {
        return None;
    }
    bincode::deserialize(payload).ok()
}

pub(super) fn save(path: &Path, streams: &[Vec<u8>; NUM_STREAMS]) -> Result<()> {
    let body = bincode::serialize(streams)
        .map_err(|e| CacheError::io(path, "encode entry data", std::io::Error::other(e)))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&crc32c::crc32c(&body).to_le_bytes());
    bytes.extend_from_slice(&body);
    super::index_file::write_atomic(path, &bytes)
}
