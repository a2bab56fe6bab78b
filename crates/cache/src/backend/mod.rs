//! The cache backend
//!
//! `Backend` is a cheap handle; all mutable state lives in a `BackendCore`
//! owned either by a dedicated tokio task (`ExecMode::Background`) or by a
//! mutex the calling task locks directly (`ExecMode::Inline`). Every public
//! operation becomes a `Command` and completes through a oneshot reply, so
//! the two modes share one code path and callers never observe partially
//! applied state.

mod core;
mod recovery;
mod trim;

#[cfg(test)]
mod tests;

use crate::config::{BackendConfig, ExecMode};
use crate::entry::{Entry, EntryRecord};
use crate::errors::{CacheError, Result};
use crate::rankings::{ListId, SlotKey};
use self::core::BackendCore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};

/// Shared, lock-free view of the per-entry write budget. Entry handles
/// consult it on every write without a round trip to the core.
pub(crate) struct Limits {
    max_file_size: AtomicI64,
}

impl Limits {
    const FRACTION: i64 = 8;

    fn new(max_size: i64) -> Self {
        let limits = Self {
            max_file_size: AtomicI64::new(1),
        };
        limits.update(max_size);
        limits
    }

    fn update(&self, max_size: i64) {
        self.max_file_size
            .store((max_size / Self::FRACTION).max(1), Ordering::Release);
    }

    pub fn max_file_size(&self) -> i64 {
        self.max_file_size.load(Ordering::Acquire)
    }
}

/// Work queued by an operation and run between commands: the worker drains
/// it after every message, inline backends on `flush`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deferred {
    Trim,
    Restart,
}

/// Enumeration cursor state, advanced by the core on each `Next`.
#[derive(Clone, Copy)]
pub(crate) enum IterState {
    NotStarted,
    Positioned(SlotKey, ListId),
    Done,
}

pub(crate) enum Command {
    Create {
        key: String,
        reply: oneshot::Sender<Result<Entry>>,
    },
    Open {
        key: String,
        reply: oneshot::Sender<Result<Entry>>,
    },
    Doom {
        key: String,
        reply: oneshot::Sender<Result<()>>,
    },
    DoomBetween {
        since: Option<SystemTime>,
        until: Option<SystemTime>,
        reply: oneshot::Sender<Result<()>>,
    },
    DoomAll {
        reply: oneshot::Sender<Result<()>>,
    },
    Next {
        state: IterState,
        reply: oneshot::Sender<(IterState, Result<Option<Entry>>)>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    SetMaxSize {
        bytes: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    /// Recency/size bookkeeping after stream I/O on a handle.
    Touch {
        record: Arc<EntryRecord>,
        delta: i64,
    },
    CloseHandle {
        record: Arc<EntryRecord>,
    },
    DoomHandle {
        record: Arc<EntryRecord>,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
    /// Test hook: persist the index as a crash would leave it, then drop the
    /// store so nothing else reaches disk.
    #[cfg(test)]
    Crash {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct InlineCore(Mutex<BackendCore>);

/// Route to the core. Cloned into every `Entry`; holds no strong reference
/// in inline mode and only a sender in background mode, so outstanding
/// handles never keep a dropped backend alive.
#[derive(Clone)]
pub(crate) enum CoreHandle {
    Inline(Weak<InlineCore>),
    Worker(mpsc::UnboundedSender<Command>),
}

impl CoreHandle {
    /// Deliver a command. If the core is gone the command is dropped, which
    /// releases its reply sender and surfaces as `Cancelled` to any waiter.
    pub fn submit(&self, command: Command) {
        match self {
            Self::Inline(weak) => {
                if let Some(core) = weak.upgrade() {
                    core.0.lock().dispatch(command);
                }
            }
            Self::Worker(sender) => {
                let _ = sender.send(command);
            }
        }
    }

    /// Fire-and-forget delivery for notifications without a reply.
    pub fn notify(&self, command: Command) {
        self.submit(command);
    }
}

fn cancelled(operation: &'static str) -> impl FnOnce(oneshot::error::RecvError) -> CacheError {
    move |_| CacheError::Cancelled { operation }
}

/// A disk-backed (or in-memory), key-addressed cache of multi-stream
/// entries with LRU-style eviction.
pub struct Backend {
    handle: CoreHandle,
    /// Keeps the inline core alive; `None` in background mode.
    _inline: Option<Arc<InlineCore>>,
}

impl Backend {
    /// Open or create a cache as described by `config`.
    pub async fn create(config: BackendConfig) -> Result<Self> {
        let exec = config.exec;
        match exec {
            ExecMode::Inline => {
                let core = BackendCore::init(config)?;
                let inline = Arc::new_cyclic(|weak| {
                    let mut core = core;
                    core.attach(CoreHandle::Inline(weak.clone()));
                    InlineCore(Mutex::new(core))
                });
                Ok(Self {
                    handle: CoreHandle::Inline(Arc::downgrade(&inline)),
                    _inline: Some(inline),
                })
            }
            ExecMode::Background => {
                let (sender, mut receiver) = mpsc::unbounded_channel();
                let mut core = BackendCore::init(config)?;
                core.attach(CoreHandle::Worker(sender.clone()));
                tokio::task::spawn(async move {
                    while let Some(command) = receiver.recv().await {
                        let done = matches!(command, Command::Shutdown);
                        core.dispatch(command);
                        core.drain_deferred();
                        if done {
                            break;
                        }
                    }
                });
                Ok(Self {
                    handle: CoreHandle::Worker(sender),
                    _inline: None,
                })
            }
        }
    }

    /// Create a new entry. Fails with `AlreadyExists` if the key names a
    /// live entry.
    pub async fn create_entry(&self, key: &str) -> Result<Entry> {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::Create {
            key: key.to_string(),
            reply,
        });
        rx.await.map_err(cancelled("create_entry"))?
    }

    /// Open an existing entry. While any handle to the key is open, the
    /// returned handle shares its record ([`Entry::ptr_eq`]).
    pub async fn open_entry(&self, key: &str) -> Result<Entry> {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::Open {
            key: key.to_string(),
            reply,
        });
        rx.await.map_err(cancelled("open_entry"))?
    }

    /// Doom the entry named by `key`. It stops being discoverable at once;
    /// its storage is reclaimed when the last handle closes.
    pub async fn doom_entry(&self, key: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::Doom {
            key: key.to_string(),
            reply,
        });
        rx.await.map_err(cancelled("doom_entry"))?
    }

    /// Doom every entry modified at or after `since`.
    pub async fn doom_entries_since(&self, since: SystemTime) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::DoomBetween {
            since: Some(since),
            until: None,
            reply,
        });
        rx.await.map_err(cancelled("doom_entries_since"))?
    }

    /// Doom every entry whose modification time falls in `[since, until)`.
    pub async fn doom_entries_between(
        &self,
        since: SystemTime,
        until: SystemTime,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::DoomBetween {
            since: Some(since),
            until: Some(until),
            reply,
        });
        rx.await.map_err(cancelled("doom_entries_between"))?
    }

    /// Doom everything. Works even when the ranking lists are damaged, and
    /// with handles open (their storage goes when they close).
    pub async fn doom_all_entries(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::DoomAll { reply });
        rx.await.map_err(cancelled("doom_all_entries"))?
    }

    /// Number of live entries. A disabled backend reports 0.
    pub async fn entry_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::Count { reply });
        rx.await.unwrap_or(0)
    }

    /// Change the capacity. Shrinking below current usage schedules an
    /// eviction pass.
    pub async fn set_max_size(&self, bytes: i64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::SetMaxSize { bytes, reply });
        rx.await.map_err(cancelled("set_max_size"))?
    }

    /// Wait until every queued command and all deferred work (eviction
    /// passes, pending restarts) has run.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::Flush { reply });
        rx.await.map_err(cancelled("flush"))
    }

    /// Begin an enumeration in recency order (most recently used first).
    pub fn create_iterator(&self) -> EntryIterator {
        EntryIterator {
            state: IterState::NotStarted,
        }
    }

    /// Advance the iterator and open the next entry, or `None` at the end.
    /// Enumeration does not change entry timestamps or recency order.
    pub async fn open_next_entry(&self, iter: &mut EntryIterator) -> Result<Option<Entry>> {
        if matches!(iter.state, IterState::Done) {
            return Ok(None);
        }
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::Next {
            state: iter.state,
            reply,
        });
        let (state, outcome) = rx
            .await
            .map_err(cancelled("open_next_entry"))?;
        iter.state = state;
        outcome
    }

    /// Finish an enumeration early. The iterator yields `None` afterwards.
    pub fn end_enumeration(&self, iter: &mut EntryIterator) {
        iter.state = IterState::Done;
    }

    /// Persist what a sudden process death would leave behind, then detach
    /// from disk. The `Backend` is consumed; reopen the path to observe
    /// recovery.
    #[cfg(test)]
    pub(crate) async fn crash(self) {
        let (reply, rx) = oneshot::channel();
        self.handle.submit(Command::Crash { reply });
        let _ = rx.await;
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.handle.notify(Command::Shutdown);
    }
}

/// Cursor over a backend's entries in recency order. Obtain with
/// [`Backend::create_iterator`]; drive with [`Backend::open_next_entry`].
pub struct EntryIterator {
    state: IterState,
}
