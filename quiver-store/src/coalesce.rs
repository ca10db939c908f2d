//! Request coalescing.
//!
//! Each request signature moves through ABSENT -> IN_FLIGHT -> ABSENT. The
//! first caller for a signature becomes the leader and installs a queue
//! entry; every caller arriving while the entry exists becomes a waiter and
//! receives a clone of the leader's outcome. The entry is removed when the
//! leader settles, on success and failure alike.
//!
//! `reset()` empties the queue but keeps each leader's waiters under its
//! ticket, so in-flight work still delivers to everyone who joined it.

use crate::store::Store;
use quiver_core::{Node, StoreResult};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::{debug, trace};

type Waiter = oneshot::Sender<StoreResult<Node>>;

#[derive(Debug)]
struct QueueEntry {
    ticket: u64,
    waiters: Vec<Waiter>,
}

#[derive(Debug, Default)]
pub(crate) struct FindQueue {
    entries: HashMap<String, QueueEntry>,
    /// Waiters of entries cleared by a reset, keyed by leader ticket.
    detached: HashMap<u64, Vec<Waiter>>,
    next_ticket: u64,
}

pub(crate) enum Slot {
    Leader(u64),
    Waiter(oneshot::Receiver<StoreResult<Node>>),
}

impl FindQueue {
    /// Join the in-flight request for `key`, or become its leader.
    pub(crate) fn claim(&mut self, key: &str) -> Slot {
        if let Some(entry) = self.entries.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            return Slot::Waiter(rx);
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.entries.insert(
            key.to_string(),
            QueueEntry {
                ticket,
                waiters: Vec::new(),
            },
        );
        Slot::Leader(ticket)
    }

    /// Remove the leader's entry and hand back everyone waiting on it.
    ///
    /// An entry installed by a newer leader under the same key is left alone.
    pub(crate) fn settle(&mut self, key: &str, ticket: u64) -> Vec<Waiter> {
        let mut waiters = self.detached.remove(&ticket).unwrap_or_default();
        if self.entries.get(key).is_some_and(|entry| entry.ticket == ticket) {
            if let Some(entry) = self.entries.remove(key) {
                waiters.extend(entry.waiters);
            }
        }
        waiters
    }

    pub(crate) fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            self.detached
                .entry(entry.ticket)
                .or_default()
                .extend(entry.waiters);
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Leader-side handle on a queue entry.
///
/// Dropping it unsettled (the leader's future was dropped) removes the entry;
/// the waiters then claim the key again.
struct PendingFind<'a> {
    store: &'a Store,
    key: String,
    ticket: u64,
    settled: bool,
}

impl PendingFind<'_> {
    fn settle(mut self, outcome: &StoreResult<Node>) {
        self.settled = true;
        let waiters = self.store.lock().find_queue.settle(&self.key, self.ticket);
        trace!(signature = %self.key, waiters = waiters.len(), ok = outcome.is_ok(), "Settled request");
        for waiter in waiters {
            // A waiter that went away has nothing left to receive.
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for PendingFind<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(signature = %self.key, "Leader dropped before settling");
            drop(self.store.lock().find_queue.settle(&self.key, self.ticket));
        }
    }
}

impl Store {
    /// Run `work` at most once per in-flight `key`, fanning its outcome out.
    ///
    /// A waiter whose leader was dropped before settling claims the key again
    /// and, if nobody else has, runs its own `work`.
    pub(crate) async fn coalesced<F>(&self, key: String, work: F) -> StoreResult<Node>
    where
        F: Future<Output = StoreResult<Node>>,
    {
        loop {
            let slot = self.lock().find_queue.claim(&key);
            match slot {
                Slot::Waiter(rx) => {
                    debug!(signature = %key, "Joined in-flight request");
                    match rx.await {
                        Ok(outcome) => return outcome,
                        Err(_) => debug!(signature = %key, "Leader went away; claiming again"),
                    }
                }
                Slot::Leader(ticket) => {
                    let pending = PendingFind {
                        store: self,
                        key,
                        ticket,
                        settled: false,
                    };
                    let outcome = work.await;
                    pending.settle(&outcome);
                    return outcome;
                }
            }
        }
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().find_queue.len()
    }
}
