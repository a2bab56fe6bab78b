//! Key-to-entry lookup
//!
//! A hash-bucketed index from key to ranking slot. The bucket count is
//! `mask + 1` and is fixed when the backend geometry is chosen; an
//! undersized table stays correct under load but degrades lookups to chain
//! scans.

use crate::rankings::{Rankings, SlotKey};

/// Default table geometry: 1024 buckets.
pub(crate) const DEFAULT_MASK: u32 = 0x3ff;

pub(crate) struct KeyIndex {
    mask: u32,
    buckets: Vec<Vec<(u64, SlotKey)>>,
}

impl KeyIndex {
    pub fn new(mask: u32) -> Self {
        debug_assert!((mask as u64 + 1).is_power_of_two());
        Self {
            mask,
            buckets: vec![Vec::new(); mask as usize + 1],
        }
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    fn bucket(&self, hash: u64) -> usize {
        (hash as u32 & self.mask) as usize
    }

    /// Find the live entry for `key`, comparing full keys on hash matches.
    pub fn find(&self, key: &str, hash: u64, rankings: &Rankings) -> Option<SlotKey> {
        self.buckets[self.bucket(hash)]
            .iter()
            .filter(|(candidate, _)| *candidate == hash)
            .find_map(|(_, slot)| {
                let record = rankings.record(*slot)?;
                (record.key() == key).then_some(*slot)
            })
    }

    pub fn insert(&mut self, hash: u64, slot: SlotKey) {
        let bucket = self.bucket(hash);
        self.buckets[bucket].push((hash, slot));
    }

    pub fn remove(&mut self, hash: u64, slot: SlotKey) {
        let bucket = self.bucket(hash);
        self.buckets[bucket].retain(|(_, candidate)| *candidate != slot);
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }
}
