//! Backend state machine
//!
//! One `BackendCore` owns the rankings, the key index, the persistent
//! store, and all counters. Nothing here is async; commands arrive through
//! `dispatch` already serialized by the executor (worker task or inline
//! mutex). Deferred work (eviction passes, restarts) is queued on
//! `deferred` and run between commands, never in the middle of one.

use super::{Command, CoreHandle, Deferred, IterState, Limits};
use crate::config::{BackendConfig, EvictionMode};
use crate::entry::{Entry, EntryRecord, NUM_STREAMS};
use crate::errors::{CacheError, Result};
use crate::hashing::hash_key;
use crate::key_index::{KeyIndex, DEFAULT_MASK};
use crate::rankings::{ListId, Rankings, SlotKey, Step};
use crate::sizing::{
    preferred_cache_size, DEFAULT_CACHE_SIZE, DEFAULT_MEMORY_CACHE_SIZE, MAX_CACHE_SIZE,
};
use crate::storage::{DiskStore, IndexNode, IndexPayload, LoadOutcome};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BackendState {
    Clean,
    /// Corruption was detected while handles were open; lookups are refused
    /// until the last handle closes and a restart runs.
    Recovering,
    /// A restart failed; the backend stays empty and refuses lookups.
    Disabled,
}

pub(crate) struct BackendCore {
    pub(super) config: BackendConfig,
    pub(super) state: BackendState,
    pub(super) rankings: Rankings,
    pub(super) key_index: KeyIndex,
    pub(super) store: Option<DiskStore>,
    pub(super) limits: Arc<Limits>,
    pub(super) max_size: i64,
    pub(super) current_size: i64,
    pub(super) entry_count: usize,
    /// Records with at least one outstanding handle.
    pub(super) open_records: usize,
    pub(super) next_id: u64,
    pub(super) deferred: VecDeque<Deferred>,
    handle: Option<CoreHandle>,
    pub(super) shut_down: bool,
}

impl BackendCore {
    pub fn init(config: BackendConfig) -> Result<Self> {
        let store = match (&config.path, config.is_memory_only()) {
            (Some(path), false) => Some(DiskStore::open(path)?),
            _ => None,
        };
        let mask = config.index_mask.unwrap_or(DEFAULT_MASK);
        let mut core = Self {
            config,
            state: BackendState::Clean,
            rankings: Rankings::new(),
            key_index: KeyIndex::new(mask),
            store,
            limits: Arc::new(Limits::new(0)),
            max_size: 0,
            current_size: 0,
            entry_count: 0,
            open_records: 0,
            next_id: 1,
            deferred: VecDeque::new(),
            handle: None,
            shut_down: false,
        };
        core.load()?;
        core.max_size = core.pick_size();
        core.limits.update(core.max_size);
        if core.current_size > core.max_size {
            core.schedule(Deferred::Trim);
        }
        Ok(core)
    }

    /// Install the route entry handles will use to reach this core.
    pub fn attach(&mut self, handle: CoreHandle) {
        self.handle = Some(handle);
    }

    fn handle(&self) -> CoreHandle {
        match &self.handle {
            Some(handle) => handle.clone(),
            // Unattached cores exist only mid-construction; a dead weak
            // handle drops notifications harmlessly.
            None => CoreHandle::Inline(Weak::new()),
        }
    }

    pub fn dispatch(&mut self, command: Command) {
        match command {
            Command::Create { key, reply } => {
                let _ = reply.send(self.create_entry(key));
            }
            Command::Open { key, reply } => {
                let _ = reply.send(self.open_entry(key));
            }
            Command::Doom { key, reply } => {
                let _ = reply.send(self.doom_key(key));
            }
            Command::DoomBetween {
                since,
                until,
                reply,
            } => {
                let _ = reply.send(self.doom_between(since, until));
            }
            Command::DoomAll { reply } => {
                let _ = reply.send(self.doom_all());
            }
            Command::Next { state, reply } => {
                let _ = reply.send(self.next_entry(state));
            }
            Command::Count { reply } => {
                let _ = reply.send(self.count());
            }
            Command::SetMaxSize { bytes, reply } => {
                let _ = reply.send(self.set_max_size(bytes));
            }
            Command::Flush { reply } => {
                self.drain_deferred();
                let _ = reply.send(());
            }
            Command::Touch { record, delta } => self.touch(&record, delta),
            Command::CloseHandle { record } => self.close_handle(&record),
            Command::DoomHandle { record, reply } => {
                self.doom_record(&record);
                let _ = reply.send(());
            }
            Command::Shutdown => self.shutdown(),
            #[cfg(test)]
            Command::Crash { reply } => {
                self.crash();
                let _ = reply.send(());
            }
        }
    }

    /// Run queued eviction passes and restarts. The worker calls this after
    /// every command; inline backends only on `flush`.
    pub fn drain_deferred(&mut self) {
        while let Some(task) = self.deferred.pop_front() {
            match task {
                Deferred::Trim => self.trim(),
                Deferred::Restart => self.restart_now(),
            }
        }
    }

    pub(super) fn schedule(&mut self, task: Deferred) {
        if !self.deferred.contains(&task) {
            self.deferred.push_back(task);
        }
    }

    pub(super) fn is_disabled(&self) -> bool {
        self.state != BackendState::Clean
    }

    fn refuses_lookups(&self) -> bool {
        self.is_disabled() || self.shut_down
    }

    // Entry operations

    fn create_entry(&mut self, key: String) -> Result<Entry> {
        if self.refuses_lookups() {
            return Err(CacheError::NotFound { key });
        }
        let hash = hash_key(&key);
        if self.key_index.find(&key, hash, &self.rankings).is_some() {
            return Err(CacheError::AlreadyExists { key });
        }
        let id = self.next_id;
        self.next_id += 1;
        let record = Arc::new(EntryRecord::new(key, hash, id));
        let list = match self.config.eviction {
            EvictionMode::TwoList => ListId::NoUse,
            EvictionMode::SingleList => ListId::Primary,
        };
        let slot = self.rankings.insert_head(list, Arc::clone(&record));
        *record.location.lock() = Some(slot);
        self.key_index.insert(hash, slot);
        self.entry_count += 1;
        let entry = self.make_handle(&record);
        self.sync_index(false);
        Ok(entry)
    }

    fn open_entry(&mut self, key: String) -> Result<Entry> {
        if self.refuses_lookups() {
            return Err(CacheError::NotFound { key });
        }
        let hash = hash_key(&key);
        let slot = match self.key_index.find(&key, hash, &self.rankings) {
            Some(slot) => slot,
            None => return Err(CacheError::NotFound { key }),
        };
        let record = match self.rankings.record(slot) {
            Some(record) => Arc::clone(record),
            None => return Err(CacheError::NotFound { key }),
        };
        if !self.ensure_loaded(&record) {
            // Missing or corrupt data file: drop the entry rather than
            // serve damaged bytes.
            warn!(key = %record.key(), "dooming entry with unreadable data");
            self.doom_slot(slot);
            self.sync_index(false);
            return Err(CacheError::NotFound { key });
        }
        match self.config.eviction {
            EvictionMode::TwoList => self.rankings.promote(slot),
            EvictionMode::SingleList => self.rankings.touch(slot),
        }
        let entry = self.make_handle(&record);
        self.sync_index(false);
        Ok(entry)
    }

    fn doom_key(&mut self, key: String) -> Result<()> {
        if self.refuses_lookups() {
            return Err(CacheError::NotFound { key });
        }
        let hash = hash_key(&key);
        match self.key_index.find(&key, hash, &self.rankings) {
            Some(slot) => {
                self.doom_slot(slot);
                self.sync_index(false);
                Ok(())
            }
            None => Err(CacheError::NotFound { key }),
        }
    }

    /// Doom entries by modification time: `since <= last_modified < until`.
    /// Walks the arena, not the lists, so damaged links cannot derail it.
    fn doom_between(
        &mut self,
        since: Option<SystemTime>,
        until: Option<SystemTime>,
    ) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        for (slot, record) in self.rankings.records() {
            let modified = record.data.lock().last_modified;
            let hit = since.is_none_or(|s| modified >= s) && until.is_none_or(|u| modified < u);
            if hit {
                self.doom_slot(slot);
            }
        }
        self.sync_index(false);
        Ok(())
    }

    fn doom_all(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        for (slot, _) in self.rankings.records() {
            self.doom_slot(slot);
        }
        self.rankings.clear();
        self.key_index.clear();
        self.entry_count = 0;
        self.current_size = 0;
        self.sync_index(false);
        Ok(())
    }

    fn count(&self) -> usize {
        if self.is_disabled() {
            0
        } else {
            self.entry_count
        }
    }

    fn set_max_size(&mut self, bytes: i64) -> Result<()> {
        if bytes <= 0 {
            return Err(CacheError::CapacityExceeded {
                requested: bytes,
                limit: MAX_CACHE_SIZE,
            });
        }
        self.max_size = bytes.min(MAX_CACHE_SIZE);
        self.limits.update(self.max_size);
        if self.current_size > self.max_size {
            self.schedule(Deferred::Trim);
        }
        Ok(())
    }

    // Enumeration

    fn next_entry(&mut self, state: IterState) -> (IterState, Result<Option<Entry>>) {
        if self.refuses_lookups() {
            return (IterState::Done, Ok(None));
        }
        let (mut step, mut list) = match state {
            IterState::NotStarted => (self.rankings.head(ListId::Primary), ListId::Primary),
            IterState::Positioned(slot, list) => (self.rankings.step(slot, list), list),
            IterState::Done => return (IterState::Done, Ok(None)),
        };
        loop {
            match step {
                Step::At(slot, record) => {
                    if !self.ensure_loaded(&record) {
                        warn!(key = %record.key(), "dooming entry with unreadable data");
                        self.doom_slot(slot);
                        self.sync_index(false);
                        // The slot is a tombstone now; keep walking from it.
                        step = self.rankings.step(slot, list);
                        continue;
                    }
                    let entry = self.make_handle(&record);
                    return (IterState::Positioned(slot, list), Ok(Some(entry)));
                }
                Step::End => {
                    if list == ListId::Primary {
                        list = ListId::NoUse;
                        step = self.rankings.head(ListId::NoUse);
                        continue;
                    }
                    return (IterState::Done, Ok(None));
                }
                Step::Lost => return (IterState::Done, Ok(None)),
                Step::Corrupt => {
                    self.integrity_event();
                    // Corruption is absorbed, not typed: the caller sees the
                    // enumeration fail and the backend recovers on its own.
                    return (
                        IterState::Done,
                        Err(CacheError::NotFound { key: String::new() }),
                    );
                }
            }
        }
    }

    // Handle notifications

    fn touch(&mut self, record: &Arc<EntryRecord>, delta: i64) {
        if self.shut_down {
            return;
        }
        let location = *record.location.lock();
        if let Some(slot) = location {
            if self.rankings.is_current(slot) {
                self.current_size += delta;
                self.rankings.touch(slot);
                if delta != 0 {
                    self.sync_index(false);
                }
                if self.current_size > self.max_size {
                    self.schedule(Deferred::Trim);
                }
            }
        }
    }

    fn close_handle(&mut self, record: &Arc<EntryRecord>) {
        if record.release() > 0 {
            return;
        }
        self.open_records = self.open_records.saturating_sub(1);
        let doomed = record.data.lock().doomed;
        if doomed {
            self.finalize(record);
        } else if !self.shut_down && !self.is_disabled() {
            self.persist_record(record);
            self.sync_index(false);
        }
        if self.state == BackendState::Recovering && self.open_records == 0 {
            self.schedule(Deferred::Restart);
        }
        if self.current_size > self.max_size {
            self.schedule(Deferred::Trim);
        }
    }

    fn doom_record(&mut self, record: &Arc<EntryRecord>) {
        let location = *record.location.lock();
        match location {
            Some(slot) if self.rankings.is_current(slot) => {
                self.doom_slot(slot);
                self.sync_index(false);
            }
            _ => {
                // Already unlinked (doomed, evicted, or lost to a reset).
                record.data.lock().doomed = true;
            }
        }
    }

    // Internals

    fn make_handle(&mut self, record: &Arc<EntryRecord>) -> Entry {
        if record.acquire() == 1 {
            self.open_records += 1;
        }
        Entry::new(Arc::clone(record), self.handle(), Arc::clone(&self.limits))
    }

    /// Remove a live entry from the structures. Storage is released now if
    /// no handle is open, otherwise when the last one closes.
    pub(super) fn doom_slot(&mut self, slot: SlotKey) {
        let record = match self.rankings.remove(slot) {
            Some(record) => record,
            None => return,
        };
        self.key_index.remove(record.hash(), slot);
        *record.location.lock() = None;
        let size = {
            let mut data = record.data.lock();
            data.doomed = true;
            data.sizes.iter().map(|s| *s as i64).sum::<i64>()
        };
        self.entry_count = self.entry_count.saturating_sub(1);
        self.current_size -= size;
        if record.open_count() == 0 {
            self.finalize(&record);
        }
    }

    fn finalize(&mut self, record: &Arc<EntryRecord>) {
        if let Some(store) = &self.store {
            store.remove_entry(record.id());
        }
    }

    /// Bring an entry's stream data into memory. `false` means the data
    /// file is missing or fails its checks.
    fn ensure_loaded(&mut self, record: &Arc<EntryRecord>) -> bool {
        let mut data = record.data.lock();
        if data.loaded {
            return true;
        }
        let Some(store) = &self.store else {
            data.loaded = true;
            return true;
        };
        match store.read_entry(record.id()) {
            Some(streams) => {
                let old: i64 = data.sizes.iter().map(|s| *s as i64).sum();
                let mut sizes = [0u64; NUM_STREAMS];
                for (size, stream) in sizes.iter_mut().zip(streams.iter()) {
                    *size = stream.len() as u64;
                }
                let new: i64 = sizes.iter().map(|s| *s as i64).sum();
                data.streams = streams;
                data.sizes = sizes;
                data.loaded = true;
                drop(data);
                self.current_size += new - old;
                true
            }
            None => false,
        }
    }

    fn persist_record(&mut self, record: &Arc<EntryRecord>) {
        let Some(store) = &self.store else { return };
        let data = record.data.lock();
        if !data.loaded || data.doomed {
            return;
        }
        if let Err(error) = store.write_entry(record.id(), &data.streams) {
            warn!(key = %record.key(), %error, "failed to persist entry data");
        }
    }

    // Persistence

    pub(super) fn sync_index(&mut self, graceful: bool) {
        if self.is_disabled() {
            return;
        }
        let Some(store) = &self.store else { return };
        let payload = build_payload(
            &self.rankings,
            &self.config,
            self.key_index.mask(),
            self.next_id,
            graceful,
        );
        if let Err(error) = store.write_index(&payload) {
            warn!(%error, "failed to write cache index");
        }
    }

    fn pick_size(&self) -> i64 {
        if self.config.max_size > 0 {
            return self.config.max_size.min(MAX_CACHE_SIZE);
        }
        match &self.store {
            None => DEFAULT_MEMORY_CACHE_SIZE,
            Some(store) => store
                .available_space()
                .map(preferred_cache_size)
                .unwrap_or(DEFAULT_CACHE_SIZE),
        }
    }

    fn load(&mut self) -> Result<()> {
        let outcome = match &self.store {
            Some(store) => store.load_index(),
            None => return Ok(()),
        };
        match outcome {
            LoadOutcome::Missing => Ok(()),
            LoadOutcome::Broken(reason) => self.recover_or_fail(reason),
            LoadOutcome::Loaded(payload) => {
                let mask_mismatch = self
                    .config
                    .index_mask
                    .is_some_and(|mask| mask != payload.mask);
                if payload.eviction != self.config.eviction || mask_mismatch {
                    return self.recover_or_fail("incompatible geometry");
                }
                self.install(payload);
                Ok(())
            }
        }
    }

    fn recover_or_fail(&mut self, reason: &'static str) -> Result<()> {
        if self.config.reset_on_error {
            warn!(reason, "discarding unusable cache index");
            self.reset_all()
        } else {
            let path = self
                .config
                .path
                .clone()
                .unwrap_or_default();
            Err(CacheError::Init {
                path,
                reason: reason.to_string(),
            })
        }
    }

    /// Rebuild in-memory state from a parsed index.
    fn install(&mut self, payload: IndexPayload) {
        let records: Vec<Arc<EntryRecord>> = payload
            .nodes
            .iter()
            .map(|node| {
                Arc::new(EntryRecord::from_index(
                    node.key.clone(),
                    node.hash,
                    node.id,
                    node.sizes,
                    time_from_ms(node.last_used_ms),
                    time_from_ms(node.last_modified_ms),
                ))
            })
            .collect();
        let raw = payload
            .nodes
            .iter()
            .zip(records.iter())
            .map(|(node, record)| {
                (
                    node.slot,
                    node.list,
                    node.prev,
                    node.next,
                    Arc::clone(record),
                )
            })
            .collect();
        let (rankings, slots) = Rankings::import(raw, payload.heads, payload.tails);
        self.rankings = rankings;
        self.key_index = KeyIndex::new(payload.mask);
        self.next_id = payload.next_id;
        self.entry_count = 0;
        self.current_size = 0;

        for ((node, record), slot) in payload.nodes.iter().zip(&records).zip(&slots) {
            if !self.rankings.is_current(*slot) {
                continue;
            }
            *record.location.lock() = Some(*slot);
            self.key_index.insert(node.hash, *slot);
            self.entry_count += 1;
            self.current_size += node.sizes.iter().map(|s| *s as i64).sum::<i64>();
        }

        if !payload.clean {
            let mut dropped = 0usize;
            for (node, slot) in payload.nodes.iter().zip(&slots) {
                if node.dirty && self.rankings.is_current(*slot) {
                    self.doom_slot(*slot);
                    dropped += 1;
                }
            }
            if dropped > 0 {
                info!(dropped, "dropped entries left open by an unclean shutdown");
            }
        }

        if self.config.validate_on_open && !self.rankings.check() {
            warn!("cache index failed structural validation; starting empty");
            if self.reset_all().is_err() {
                self.state = BackendState::Disabled;
            }
        }
    }

    /// Wipe persisted state and start from empty structures.
    pub(super) fn reset_all(&mut self) -> Result<()> {
        if let Some(store) = &self.store {
            store.wipe()?;
        }
        self.rankings.clear();
        self.key_index = KeyIndex::new(self.config.index_mask.unwrap_or(DEFAULT_MASK));
        self.entry_count = 0;
        self.current_size = 0;
        Ok(())
    }

    // Lifecycle

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.deferred.clear();
        if !self.is_disabled() && self.store.is_some() {
            for (_, record) in self.rankings.records() {
                self.persist_record(&record);
            }
            self.sync_index(true);
        }
        debug!("cache backend shut down");
    }

    #[cfg(test)]
    fn crash(&mut self) {
        self.sync_index(false);
        self.store = None;
        self.shut_down = true;
        self.deferred.clear();
    }
}

fn build_payload(
    rankings: &Rankings,
    config: &BackendConfig,
    mask: u32,
    next_id: u64,
    graceful: bool,
) -> IndexPayload {
    let nodes = rankings
        .export()
        .into_iter()
        .map(|(slot, list, prev, next, record)| {
            let data = record.data.lock();
            IndexNode {
                slot,
                list,
                prev,
                next,
                key: record.key().to_string(),
                hash: record.hash(),
                id: record.id(),
                sizes: data.sizes,
                last_used_ms: ms_since_epoch(data.last_used),
                last_modified_ms: ms_since_epoch(data.last_modified),
                dirty: !graceful && record.open_count() > 0,
            }
        })
        .collect();
    IndexPayload {
        clean: graceful,
        eviction: config.eviction,
        mask,
        next_id,
        heads: rankings.heads(),
        tails: rankings.tails(),
        nodes,
    }
}

fn ms_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn time_from_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
