//! Single-flight lock table.
//!
//! Callers that want to produce the same cache entry serialize on one async mutex per key. The
//! table only holds keys that somebody is holding or waiting for: each slot counts its tickets
//! and the last ticket to go away removes the slot, so the table stays bounded by the number of
//! concurrent flights instead of growing for the life of the process.
//!
//! Dropping a pending [`LockTable::acquire`] future (e.g. on cancellation) releases its ticket,
//! and dropping a [`FlightGuard`] unlocks the key for the next waiter.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    tickets: usize,
}

type Slots<K> = Arc<Mutex<HashMap<K, Slot>>>;

/// Keyed async mutexes whose entries disappear once unused.
pub struct LockTable<K>
where
    K: Eq + Hash + Clone,
{
    slots: Slots<K>,
}

impl<K> Default for LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> fmt::Debug for LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("keys", &self.len())
            .finish()
    }
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and lock it.
    pub async fn acquire(&self, key: K) -> FlightGuard<K> {
        let ticket = self.ticket(key);
        let guard = ticket.lock.clone().lock_owned().await;
        FlightGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ticket(&self, key: K) -> Ticket<K> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
            lock: Arc::new(AsyncMutex::new(())),
            tickets: 0,
        });
        slot.tickets += 1;
        trace!("locks: ticket issued tickets={}", slot.tickets);
        Ticket {
            lock: slot.lock.clone(),
            key,
            slots: self.slots.clone(),
        }
    }
}

/// Registration of one holder or waiter in the table.
struct Ticket<K>
where
    K: Eq + Hash,
{
    lock: Arc<AsyncMutex<()>>,
    key: K,
    slots: Slots<K>,
}

impl<K> Drop for Ticket<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        let remove = match slots.get_mut(&self.key) {
            Some(slot) => {
                slot.tickets = slot.tickets.saturating_sub(1);
                slot.tickets == 0
            }
            None => false,
        };
        if remove {
            slots.remove(&self.key);
            trace!("locks: slot released, {} keys remain", slots.len());
        }
    }
}

/// Exclusive hold on one key of a [`LockTable`].
pub struct FlightGuard<K>
where
    K: Eq + Hash,
{
    // Field order matters: unlock before the ticket leaves the table.
    _guard: OwnedMutexGuard<()>,
    _ticket: Ticket<K>,
}
