//! Per-conversation serialization.
//!
//! Each key owns a queue of tickets linked by oneshot channels: a ticket's
//! pass is granted once the previous ticket for the same key has released.
//! Tickets are issued synchronously, so queue order is exactly the order in
//! which [`ConversationGate::enter`] was called.
//!
//! A key is evicted as soon as its newest holder releases, so the table only
//! contains conversations with queued or running work.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Debug)]
struct Slot {
    /// Sequence number of the newest ticket for this key
    seq: u64,
    /// Fires (or closes) when the newest ticket releases
    tail: oneshot::Receiver<()>,
}

type SlotTable = DashMap<String, Slot>;

/// Keyed FIFO gate; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ConversationGate {
    slots: Arc<SlotTable>,
    next_seq: Arc<AtomicU64>,
}

impl ConversationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a place in the queue for `key`.
    pub fn enter(&self, key: &str) -> GateTicket {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (signal, tail) = oneshot::channel();

        let predecessor = match self.slots.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.seq = seq;
                Some(std::mem::replace(&mut slot.tail, tail))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Slot { seq, tail });
                None
            }
        };

        GateTicket {
            predecessor,
            release: Some(Release {
                key: key.to_string(),
                seq,
                slots: self.slots.clone(),
                _signal: signal,
            }),
        }
    }

    /// Run `body` while holding the gate for `key`.
    pub async fn with_lock<F, T>(&self, key: &str, body: F) -> T
    where
        F: Future<Output = T>,
    {
        let _pass = self.enter(key).wait().await;
        body.await
    }

    /// Number of keys with queued or running work.
    pub fn active_keys(&self) -> usize {
        self.slots.len()
    }
}

/// Releases a queue position when dropped.
#[derive(Debug)]
struct Release {
    key: String,
    seq: u64,
    slots: Arc<SlotTable>,
    // Dropping the sender wakes the next ticket
    _signal: oneshot::Sender<()>,
}

impl Drop for Release {
    fn drop(&mut self) {
        let removed = self
            .slots
            .remove_if(&self.key, |_, slot| slot.seq == self.seq)
            .is_some();
        trace!(key = %self.key, seq = self.seq, evicted = removed, "Gate released");
    }
}

/// A reserved place in a key's queue.
///
/// Dropping a ticket without waiting still keeps the queue ordered: its
/// release is deferred until its predecessor has released.
#[must_use = "a ticket holds up every later ticket for its key"]
#[derive(Debug)]
pub struct GateTicket {
    predecessor: Option<oneshot::Receiver<()>>,
    release: Option<Release>,
}

impl GateTicket {
    /// Suspend until every earlier ticket for the key has released.
    pub async fn wait(mut self) -> GatePass {
        if let Some(predecessor) = self.predecessor.as_mut() {
            // Err means the predecessor released by dropping its sender
            let _ = predecessor.await;
        }
        self.predecessor = None;

        GatePass {
            _release: self.release.take(),
        }
    }
}

impl Drop for GateTicket {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };
        let Some(predecessor) = self.predecessor.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = predecessor.await;
                    drop(release);
                });
            }
            Err(_) => drop(release),
        }
    }
}

/// Exclusive access to a key; released on drop.
#[must_use = "the gate is released as soon as the pass is dropped"]
#[derive(Debug)]
pub struct GatePass {
    _release: Option<Release>,
}
