// src/notify.rs

//! Per-commit single-fire signals.
//!
//! A [`Notifier`] keeps one slot per key. Waiters register a continuation
//! (a `oneshot` sender) while the slot is still waiting; [`Notifier::fire`]
//! resolves every registered continuation exactly once and records the state,
//! so subscribers arriving later return immediately.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::trace;

use crate::errors::{CommitflowError, Result};
use crate::types::CommitState;

#[derive(Debug)]
enum Slot {
    Waiting(Vec<oneshot::Sender<CommitState>>),
    Fired(CommitState),
}

/// Result of registering interest in a key.
#[derive(Debug)]
pub enum Subscription {
    /// The key had already fired.
    Ready(CommitState),
    /// The key has not fired yet.
    Pending(oneshot::Receiver<CommitState>),
}

impl Subscription {
    /// Suspend until the key fires.
    ///
    /// Dropping the returned future unregisters nothing explicitly; the dead
    /// sender is pruned on the next subscription to the same key.
    pub async fn wait(self) -> Result<CommitState> {
        match self {
            Subscription::Ready(state) => Ok(state),
            Subscription::Pending(rx) => rx.await.map_err(|_| CommitflowError::RuntimeStopped),
        }
    }
}

/// Registry of single-fire slots keyed by commit sequence number.
#[derive(Debug, Default)]
pub struct Notifier {
    slots: Mutex<HashMap<u64, Slot>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`.
    pub fn subscribe(&self, key: u64) -> Subscription {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.entry(key).or_insert_with(|| Slot::Waiting(Vec::new())) {
            Slot::Fired(state) => Subscription::Ready(*state),
            Slot::Waiting(waiters) => {
                waiters.retain(|tx| !tx.is_closed());
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Subscription::Pending(rx)
            }
        }
    }

    /// Fire `key` with `state`.
    ///
    /// Returns `false` if the key had already fired; the recorded state is
    /// left untouched in that case.
    pub fn fire(&self, key: u64, state: CommitState) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(key).or_insert_with(|| Slot::Waiting(Vec::new()));

        match std::mem::replace(slot, Slot::Fired(state)) {
            Slot::Fired(old) => {
                *slot = Slot::Fired(old);
                false
            }
            Slot::Waiting(waiters) => {
                trace!(key, waiters = waiters.len(), %state, "firing notifier slot");
                for tx in waiters {
                    // A closed receiver just means the waiter went away.
                    let _ = tx.send(state);
                }
                true
            }
        }
    }

    /// State recorded for `key`, if it has fired.
    pub fn fired_state(&self, key: u64) -> Option<CommitState> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get(&key) {
            Some(Slot::Fired(state)) => Some(*state),
            _ => None,
        }
    }

    /// Number of live waiters registered on `key`.
    pub fn waiter_count(&self, key: u64) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get(&key) {
            Some(Slot::Waiting(waiters)) => waiters.iter().filter(|tx| !tx.is_closed()).count(),
            _ => 0,
        }
    }
}
