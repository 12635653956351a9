//! Per-key locks between user edits and sync passes.
//!
//! A user edit holds a reference-counted lock on its key while it applies
//! an update. A sync pass marks the keys it sends as syncing; a key that is
//! locked cannot start syncing, and lock requests for a syncing key wait
//! until the pass calls [`SynchronizationLocks::sync_done`].

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct KeyState {
    locks: usize,
    syncing: bool,
    waiters: VecDeque<oneshot::Sender<bool>>,
}

impl KeyState {
    fn is_idle(&self) -> bool {
        self.locks == 0 && !self.syncing && self.waiters.is_empty()
    }
}

/// Lock table of one store.
#[derive(Debug, Default)]
pub struct SynchronizationLocks {
    keys: Mutex<HashMap<String, KeyState>>,
}

impl SynchronizationLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a lock on `key`, waiting while the key is syncing.
    ///
    /// Returns `false` when the table was reset before the lock was granted.
    pub async fn lock(&self, key: &str) -> bool {
        let waiter = {
            let mut keys = self.keys.lock();
            let state = keys.entry(key.to_string()).or_default();
            if !state.syncing {
                state.locks += 1;
                return true;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        waiter.await.unwrap_or(false)
    }

    /// Releases one lock on `key`.
    pub fn unlock(&self, key: &str) {
        let mut keys = self.keys.lock();
        if let Some(state) = keys.get_mut(key) {
            state.locks = state.locks.saturating_sub(1);
            if state.is_idle() {
                keys.remove(key);
            }
        }
    }

    /// Marks `key` as syncing. Refused while the key is locked or already
    /// syncing.
    pub fn start_sync(&self, key: &str) -> bool {
        let mut keys = self.keys.lock();
        let state = keys.entry(key.to_string()).or_default();
        if state.locks > 0 || state.syncing {
            return false;
        }
        state.syncing = true;
        true
    }

    /// Ends the sync of `key` and grants waiting lock requests in arrival
    /// order.
    pub fn sync_done(&self, key: &str) {
        let mut keys = self.keys.lock();
        let Some(state) = keys.get_mut(key) else {
            return;
        };
        state.syncing = false;
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(true).is_ok() {
                state.locks += 1;
            }
        }
        if state.is_idle() {
            keys.remove(key);
        }
    }

    /// Whether `key` is held by at least one lock.
    pub fn is_locked(&self, key: &str) -> bool {
        self.keys.lock().get(key).is_some_and(|s| s.locks > 0)
    }

    /// Whether `key` is currently being synced.
    pub fn is_syncing(&self, key: &str) -> bool {
        self.keys.lock().get(key).is_some_and(|s| s.syncing)
    }

    /// Forgets every lock; waiting requests are refused.
    pub fn reset(&self) {
        let states: Vec<KeyState> = self.keys.lock().drain().map(|(_, s)| s).collect();
        for state in states {
            for waiter in state.waiters {
                let _ = waiter.send(false);
            }
        }
    }

    /// Takes a lock released when the returned guard drops.
    pub async fn acquire(self: &Arc<Self>, key: &str) -> Option<ItemLock> {
        if self.lock(key).await {
            Some(ItemLock {
                locks: Arc::clone(self),
                key: key.to_string(),
            })
        } else {
            None
        }
    }
}

/// A lock on one key, released on drop.
#[derive(Debug)]
pub struct ItemLock {
    locks: Arc<SynchronizationLocks>,
    key: String,
}

impl ItemLock {
    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ItemLock {
    fn drop(&mut self) {
        self.locks.unlock(&self.key);
    }
}
