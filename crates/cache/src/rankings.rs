//! Recency bookkeeping for eviction
//!
//! One or two doubly-linked lists of live entries, newest at the head.
//! Nodes live in an arena and link to each other by slot index, never by
//! pointer. Every slot carries a generation counter: an unlinked slot keeps
//! a forwarding tombstone until it is reused, and reuse bumps the
//! generation, so a stale reference held by an iterator is detected instead
//! of dereferenced.

use crate::entry::EntryRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sentinel slot index meaning "no node".
pub(crate) const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ListId {
    /// Entries with a history of reuse (the only list in single-list mode).
    Primary = 0,
    /// Entries never reused since insertion, evicted first.
    NoUse = 1,
}

impl ListId {
    const ALL: [ListId; 2] = [ListId::Primary, ListId::NoUse];

    fn index(self) -> usize {
        self as usize
    }
}

/// Stable reference to a node: slot index plus the generation the slot had
/// when the reference was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotKey {
    pub slot: u32,
    pub generation: u32,
}

pub(crate) struct Node {
    pub record: Arc<EntryRecord>,
    pub list: ListId,
    pub prev: u32,
    pub next: u32,
}

enum SlotState {
    Free,
    Live(Node),
    /// Recently unlinked. `next` is where the node's successor was at unlink
    /// time, letting an iterator positioned here skip forward.
    Tombstone { next: u32 },
}

struct Slot {
    generation: u32,
    state: SlotState,
}

/// Result of resolving an iterator position or a list end.
pub(crate) enum Step {
    At(SlotKey, Arc<EntryRecord>),
    /// Clean end of the list.
    End,
    /// The reference is stale (slot reused); the walk cannot continue.
    Lost,
    /// A link points at something that is not a live node of this list:
    /// structural corruption.
    Corrupt,
}

pub(crate) struct Rankings {
    slots: Vec<Slot>,
    free: Vec<u32>,
    heads: [u32; 2],
    tails: [u32; 2],
    len: usize,
}

impl Rankings {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            heads: [NIL; 2],
            tails: [NIL; 2],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn alloc(&mut self) -> u32 {
        if let Some(slot) = self.free.pop() {
            // Reuse invalidates outstanding references to the old occupant.
            self.slots[slot as usize].generation += 1;
            return slot;
        }
        self.slots.push(Slot {
            generation: 1,
            state: SlotState::Free,
        });
        (self.slots.len() - 1) as u32
    }

    fn live(&self, slot: u32) -> Option<&Node> {
        match self.slots.get(slot as usize)?.state {
            SlotState::Live(ref node) => Some(node),
            _ => None,
        }
    }

    fn live_mut(&mut self, slot: u32) -> Option<&mut Node> {
        match self.slots.get_mut(slot as usize)?.state {
            SlotState::Live(ref mut node) => Some(node),
            _ => None,
        }
    }

    fn key_of(&self, slot: u32) -> SlotKey {
        SlotKey {
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    /// Check that `key` still names the node it was taken from.
    pub fn is_current(&self, key: SlotKey) -> bool {
        match self.slots.get(key.slot as usize) {
            Some(slot) => slot.generation == key.generation && matches!(slot.state, SlotState::Live(_)),
            None => false,
        }
    }

    pub fn record(&self, key: SlotKey) -> Option<&Arc<EntryRecord>> {
        if !self.is_current(key) {
            return None;
        }
        self.live(key.slot).map(|node| &node.record)
    }

    /// Insert a new record at the head of `list`.
    pub fn insert_head(&mut self, list: ListId, record: Arc<EntryRecord>) -> SlotKey {
        let slot = self.alloc();
        let old_head = self.heads[list.index()];
        self.slots[slot as usize].state = SlotState::Live(Node {
            record,
            list,
            prev: NIL,
            next: old_head,
        });
        if let Some(head) = self.live_mut(old_head) {
            head.prev = slot;
        }
        self.heads[list.index()] = slot;
        if self.tails[list.index()] == NIL {
            self.tails[list.index()] = slot;
        }
        self.len += 1;
        self.key_of(slot)
    }

    /// Unlink a node, leaving a forwarding tombstone behind for iterators.
    pub fn remove(&mut self, key: SlotKey) -> Option<Arc<EntryRecord>> {
        if !self.is_current(key) {
            return None;
        }
        let (record, list, prev, next) = {
            let node = self.live(key.slot)?;
            (node.record.clone(), node.list, node.prev, node.next)
        };
        self.unlink(key.slot, list, prev, next);
        self.slots[key.slot as usize].state = SlotState::Tombstone { next };
        self.free.push(key.slot);
        self.len -= 1;
        Some(record)
    }

    fn unlink(&mut self, slot: u32, list: ListId, prev: u32, next: u32) {
        // Best effort on the neighbors; a link that does not resolve is left
        // for the integrity check to report.
        if let Some(node) = self.live_mut(prev) {
            node.next = next;
        }
        if let Some(node) = self.live_mut(next) {
            node.prev = prev;
        }
        if self.heads[list.index()] == slot {
            self.heads[list.index()] = next;
        }
        if self.tails[list.index()] == slot {
            self.tails[list.index()] = prev;
        }
    }

    /// Move a node to the head of its current list. The slot and generation
    /// are unchanged, so iterator references stay valid.
    pub fn touch(&mut self, key: SlotKey) {
        if !self.is_current(key) {
            return;
        }
        let (list, prev, next) = {
            let node = match self.live(key.slot) {
                Some(node) => node,
                None => return,
            };
            (node.list, node.prev, node.next)
        };
        if self.heads[list.index()] == key.slot {
            return;
        }
        self.unlink(key.slot, list, prev, next);
        let old_head = self.heads[list.index()];
        if let Some(node) = self.live_mut(old_head) {
            node.prev = key.slot;
        }
        if let Some(node) = self.live_mut(key.slot) {
            node.prev = NIL;
            node.next = old_head;
        }
        self.heads[list.index()] = key.slot;
        if self.tails[list.index()] == NIL {
            self.tails[list.index()] = key.slot;
        }
    }

    /// Move a node to the head of the primary list (two-list promotion).
    pub fn promote(&mut self, key: SlotKey) {
        if !self.is_current(key) {
            return;
        }
        let (list, prev, next) = {
            let node = match self.live(key.slot) {
                Some(node) => node,
                None => return,
            };
            (node.list, node.prev, node.next)
        };
        if list != ListId::Primary {
            self.unlink(key.slot, list, prev, next);
            let old_head = self.heads[ListId::Primary.index()];
            if let Some(node) = self.live_mut(old_head) {
                node.prev = key.slot;
            }
            if let Some(node) = self.live_mut(key.slot) {
                node.list = ListId::Primary;
                node.prev = NIL;
                node.next = old_head;
            }
            self.heads[ListId::Primary.index()] = key.slot;
            if self.tails[ListId::Primary.index()] == NIL {
                self.tails[ListId::Primary.index()] = key.slot;
            }
        } else {
            self.touch(key);
        }
    }

    /// First node of `list` (most recently used).
    pub fn head(&self, list: ListId) -> Step {
        self.resolve(self.heads[list.index()], list)
    }

    /// Last node of `list` (the eviction victim).
    pub fn tail(&self, list: ListId) -> Step {
        self.resolve(self.tails[list.index()], list)
    }

    fn resolve(&self, slot: u32, list: ListId) -> Step {
        if slot == NIL {
            return Step::End;
        }
        match self.slots.get(slot as usize) {
            Some(Slot {
                state: SlotState::Live(node),
                ..
            }) if node.list == list => Step::At(self.key_of(slot), node.record.clone()),
            _ => Step::Corrupt,
        }
    }

    /// Advance from a previously returned position, skipping nodes unlinked
    /// since the reference was taken.
    pub fn step(&self, from: SlotKey, list: ListId) -> Step {
        let slot = match self.slots.get(from.slot as usize) {
            Some(slot) if slot.generation == from.generation => slot,
            _ => return Step::Lost,
        };
        let (mut candidate, mut via_tombstone) = match slot.state {
            // A node moved to another list since the reference was taken
            // (opened mid-walk and promoted); its links no longer describe
            // this list, so the position is stale, not corrupt.
            SlotState::Live(ref node) if node.list != list => return Step::Lost,
            SlotState::Live(ref node) => (node.next, false),
            SlotState::Tombstone { next } => (next, true),
            SlotState::Free => return Step::Lost,
        };

        // Chase forwarding tombstones, bounded by the arena size.
        for _ in 0..=self.slots.len() {
            if candidate == NIL {
                return Step::End;
            }
            match self.slots.get(candidate as usize) {
                Some(Slot {
                    state: SlotState::Live(node),
                    ..
                }) => {
                    if node.list != list {
                        // Reachable directly, this is a link crossing lists
                        // and `check` would reject it. Reached through a
                        // tombstone it just means the recorded successor
                        // moved on.
                        return if via_tombstone { Step::Lost } else { Step::Corrupt };
                    }
                    // A live successor must point back at us; a mismatch is
                    // structural damage, not staleness. Skipped tombstones
                    // have already relinked the successor elsewhere.
                    if !via_tombstone && node.prev != from.slot {
                        return Step::Corrupt;
                    }
                    return Step::At(self.key_of(candidate), node.record.clone());
                }
                Some(Slot {
                    state: SlotState::Tombstone { next },
                    ..
                }) => {
                    candidate = *next;
                    via_tombstone = true;
                }
                None => {
                    return if via_tombstone { Step::Lost } else { Step::Corrupt };
                }
                Some(Slot {
                    state: SlotState::Free,
                    ..
                }) => {
                    return if via_tombstone { Step::Lost } else { Step::Corrupt };
                }
            }
        }
        Step::Corrupt
    }

    /// Structural validation: every live node reachable from exactly one
    /// head, links paired, lists acyclic, tails consistent.
    pub fn check(&self) -> bool {
        let mut visited = 0usize;
        for list in ListId::ALL {
            let mut slot = self.heads[list.index()];
            let mut prev = NIL;
            let mut steps = 0usize;
            while slot != NIL {
                steps += 1;
                if steps > self.len {
                    return false; // cycle
                }
                let node = match self.live(slot) {
                    Some(node) => node,
                    None => return false, // dangling link
                };
                if node.list != list || node.prev != prev {
                    return false;
                }
                prev = slot;
                slot = node.next;
            }
            if self.tails[list.index()] != prev {
                return false;
            }
            visited += steps;
        }
        visited == self.len
    }

    /// Snapshot of every live node, in arena order. Used by operations that
    /// must not trust the list links (bulk doom, interval doom).
    pub fn records(&self) -> Vec<(SlotKey, Arc<EntryRecord>)> {
        let mut out = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter().enumerate() {
            if let SlotState::Live(ref node) = slot.state {
                out.push((
                    SlotKey {
                        slot: index as u32,
                        generation: slot.generation,
                    },
                    node.record.clone(),
                ));
            }
        }
        out
    }

    /// Drop every node and invalidate all outstanding references.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.generation += 1;
            slot.state = SlotState::Free;
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.heads = [NIL; 2];
        self.tails = [NIL; 2];
        self.len = 0;
    }

    /// Raw view of the lists for persistence: (slot, list, prev, next, record).
    pub fn export(&self) -> Vec<(u32, ListId, u32, u32, Arc<EntryRecord>)> {
        let mut out = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter().enumerate() {
            if let SlotState::Live(ref node) = slot.state {
                out.push((
                    index as u32,
                    node.list,
                    node.prev,
                    node.next,
                    node.record.clone(),
                ));
            }
        }
        out
    }

    /// Rebuild the arena exactly as persisted, including any broken links.
    /// Returns the slot keys assigned to each imported node, in input order.
    pub fn import(
        nodes: Vec<(u32, ListId, u32, u32, Arc<EntryRecord>)>,
        heads: [u32; 2],
        tails: [u32; 2],
    ) -> (Self, Vec<SlotKey>) {
        let max_slot = nodes.iter().map(|n| n.0).max().map_or(0, |m| m as usize + 1);
        let mut slots: Vec<Slot> = (0..max_slot)
            .map(|_| Slot {
                generation: 1,
                state: SlotState::Free,
            })
            .collect();
        let mut keys = Vec::with_capacity(nodes.len());
        let mut len = 0usize;
        for (slot, list, prev, next, record) in nodes {
            let entry = &mut slots[slot as usize];
            if matches!(entry.state, SlotState::Live(_)) {
                // Duplicate slot in the file; keep the first occupant.
                keys.push(SlotKey {
                    slot,
                    generation: 0,
                });
                continue;
            }
            entry.state = SlotState::Live(Node {
                record,
                list,
                prev,
                next,
            });
            keys.push(SlotKey {
                slot,
                generation: 1,
            });
            len += 1;
        }
        let free = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot.state, SlotState::Free))
            .map(|(index, _)| index as u32)
            .rev()
            .collect();
        (
            Self {
                slots,
                free,
                heads,
                tails,
                len,
            },
            keys,
        )
    }

    pub fn heads(&self) -> [u32; 2] {
        self.heads
    }

    pub fn tails(&self) -> [u32; 2] {
        self.tails
    }

    /// Overwrite one node's links. Test-only hook for building damaged
    /// structures.
    #[cfg(test)]
    pub fn corrupt_links(&mut self, key: SlotKey, prev: u32, next: u32) {
        if let Some(node) = self.live_mut(key.slot) {
            node.prev = prev;
            node.next = next;
        }
    }
}
