//! Deduplicating work queue.
//!
//! Holds at most one pending payload per [`ResourceUid`]. A newer payload for
//! an identity that is already pending replaces it in place: the identity
//! keeps the position of its first insertion, so a resource that churns
//! cannot starve the others. Items leave in first-enqueued order of distinct
//! identities, to a single consumer.
//!
//! Insert, coalesce and dequeue run under one lock. The consumer parks on a
//! [`Notify`] while the queue is empty.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use envsync_core::types::ResourceUid;

/// One pending change, handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem<P> {
    pub identity: ResourceUid,
    pub payload: P,
}

/// What [`DedupQueue::enqueue`] did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The identity was not pending; it joined the back of the queue.
    Inserted,
    /// The identity was pending; its payload was replaced in place.
    Coalesced,
    /// The queue is closed; the payload was discarded.
    Closed,
}

#[derive(Debug)]
struct QueueState<P> {
    order: VecDeque<ResourceUid>,
    pending: HashMap<ResourceUid, P>,
    closed: bool,
}

#[derive(Debug)]
pub struct DedupQueue<P> {
    state: Mutex<QueueState<P>>,
    ready: Notify,
}

impl<P> Default for DedupQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> DedupQueue<P> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                pending: HashMap::new(),
                closed: false,
            }),
            ready: Notify::new(),
        }
    }

    /// Insert or replace the pending payload for `identity`. Never blocks on
    /// the consumer.
    pub fn enqueue(&self, identity: ResourceUid, payload: P) -> Enqueued {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return Enqueued::Closed;
            }
            match state.pending.insert(identity.clone(), payload) {
                Some(_) => Enqueued::Coalesced,
                None => {
                    state.order.push_back(identity);
                    Enqueued::Inserted
                }
            }
        };
        if outcome == Enqueued::Inserted {
            self.ready.notify_one();
        }
        outcome
    }

    /// Put back a payload whose processing failed transiently.
    ///
    /// Returns `false` without touching the queue when a newer payload for
    /// the identity arrived in the meantime; the newer one wins.
    pub fn requeue(&self, identity: ResourceUid, payload: P) -> bool {
        {
            let mut state = self.lock();
            if state.closed || state.pending.contains_key(&identity) {
                return false;
            }
            state.pending.insert(identity.clone(), payload);
            state.order.push_back(identity);
        }
        self.ready.notify_one();
        true
    }

    /// Take the oldest pending item, if any.
    pub fn try_dequeue(&self) -> Option<QueueItem<P>> {
        let mut state = self.lock();
        while let Some(identity) = state.order.pop_front() {
            if let Some(payload) = state.pending.remove(&identity) {
                return Some(QueueItem { identity, payload });
            }
        }
        None
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// drained.
    pub async fn dequeue(&self) -> Option<QueueItem<P>> {
        loop {
            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }
            if self.lock().closed {
                return None;
            }
            self.ready.notified().await;
        }
    }

    /// Number of distinct identities pending.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting payloads and wake the consumer so it can drain and exit.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
