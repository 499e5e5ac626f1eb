//! Per-key mutual exclusion.
//!
//! Decisions about the same key run one at a time; decisions about different
//! keys never wait on each other. Slots are created on demand and dropped
//! once nobody holds or waits for them, including waiters that are
//! cancelled before they get the lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Entry {
    slot: Arc<AsyncMutex<()>>,
    // Holders plus waiters.
    users: usize,
}

/// A table of async locks, one per key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Entry>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let entry = slots.entry(key.clone()).or_default();
            entry.users += 1;
            entry.slot.clone()
        };
        // Registered before waiting, so dropping this future gives the slot back.
        let mut guard = KeyGuard {
            locks: self,
            key,
            guard: None,
        };
        guard.guard = Some(slot.lock_owned().await);
        guard
    }

    /// Number of keys with a live slot.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key; released on drop.
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
    locks: &'a KeyedLocks<K>,
    key: K,
    // None while still waiting.
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(|e| e.into_inner());
        self.guard.take();
        if let Some(entry) = slots.get_mut(&self.key) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}
