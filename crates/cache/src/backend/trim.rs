//! Eviction
//!
//! Runs as deferred work whenever `current_size` passes `max_size`. Victims
//! come from the no-use tail first (two-list mode), then the primary tail.
//! Open victims are doomed immediately, which already releases their share
//! of `current_size`; their files go when the last handle closes, and that
//! close can cascade another pass. Each pass is bounded so a damaged list
//! can never spin the executor.

use super::core::BackendCore;
use super::Deferred;
use crate::rankings::{ListId, SlotKey, Step};
use tracing::debug;

/// Victims removed per pass before the pass reschedules itself.
const TRIM_BATCH: usize = 16;

impl BackendCore {
    pub(super) fn trim(&mut self) {
        if self.is_disabled() || self.shut_down {
            return;
        }
        let mut removed = 0usize;
        while self.current_size > self.max_size && removed < TRIM_BATCH {
            let victim = match self.pick_victim() {
                Some(victim) => victim,
                None => break,
            };
            self.doom_slot(victim);
            removed += 1;
            if self.is_disabled() {
                return;
            }
        }
        if removed > 0 {
            debug!(removed, "evicted entries");
            self.sync_index(false);
        }
        if self.current_size > self.max_size && removed == TRIM_BATCH {
            self.schedule(Deferred::Trim);
        }
    }

    fn pick_victim(&mut self) -> Option<SlotKey> {
        for list in [ListId::NoUse, ListId::Primary] {
            match self.rankings.tail(list) {
                Step::At(slot, _) => return Some(slot),
                Step::End => continue,
                Step::Lost | Step::Corrupt => {
                    self.integrity_event();
                    return None;
                }
            }
        }
        None
    }
}
