//! Reference-counted per-key exclusive slots.
//!
//! A single coarse mutex guards a map of key -> (semaphore, refs). Every
//! waiter bumps `refs` before it blocks and drops it after it releases, and
//! the entry is removed when `refs` returns to zero, so the map only holds
//! keys somebody is currently holding or waiting on.

use crate::cancel::CancellationToken;
use crate::error::{MetadataError, Result};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Slot {
    semaphore: Arc<Semaphore>,
    refs: usize,
}

type SlotMap<K> = Arc<Mutex<HashMap<K, Slot>>>;

fn lock_map<K>(map: &Mutex<HashMap<K, Slot>>) -> MutexGuard<'_, HashMap<K, Slot>> {
    // Nothing in the critical sections can panic half-way through an update
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-key mutual exclusion with automatic cleanup of idle keys.
pub struct KeyedLocks<K> {
    slots: SlotMap<K>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Display + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `key`.
    ///
    /// Fails with `Cancelled` when `cancel` fires and with `LockTimeout` when
    /// `timeout` elapses first. Either way the reference taken on the slot is
    /// given back.
    pub async fn acquire(
        &self,
        key: K,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<KeyedGuard<K>> {
        cancel.check()?;

        let semaphore = {
            let mut slots = lock_map(&self.slots);
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                semaphore: Arc::new(Semaphore::new(1)),
                refs: 0,
            });
            slot.refs += 1;
            slot.semaphore.clone()
        };
        let reference = SlotRef {
            slots: self.slots.clone(),
            key: key.clone(),
        };

        let wait = async {
            let acquire = semaphore.acquire_owned();
            let acquired = match timeout {
                Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                    MetadataError::LockTimeout {
                        resource: key.to_string(),
                        waited: limit,
                    }
                })?,
                None => acquire.await,
            };
            acquired.map_err(|_| MetadataError::Other(format!("Lock for {} was closed", key)))
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MetadataError::Cancelled),
            permit = wait => permit?,
        };

        Ok(KeyedGuard {
            permit: Some(permit),
            _reference: reference,
        })
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        lock_map(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        lock_map(&self.slots).keys().cloned().collect()
    }
}

/// One counted reference on a slot; dropping it may remove the slot.
struct SlotRef<K: Eq + Hash> {
    slots: SlotMap<K>,
    key: K,
}

impl<K: Eq + Hash> Drop for SlotRef<K> {
    fn drop(&mut self) {
        let mut slots = lock_map(&self.slots);
        let remove = match slots.get_mut(&self.key) {
            Some(slot) => {
                slot.refs -= 1;
                slot.refs == 0
            }
            None => false,
        };
        if remove {
            slots.remove(&self.key);
        }
    }
}

/// Exclusive ownership of one key. Released exactly once, on drop or
/// through `release`.
pub struct KeyedGuard<K: Eq + Hash> {
    // Field order matters: the permit must be returned before the slot
    // reference is dropped, otherwise the slot could be removed and recreated
    // while this holder still owns the old semaphore.
    permit: Option<OwnedSemaphorePermit>,
    _reference: SlotRef<K>,
}

impl<K: Eq + Hash> KeyedGuard<K> {
    pub fn release(self) {
        drop(self);
    }
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        self.permit.take();
    }
}
