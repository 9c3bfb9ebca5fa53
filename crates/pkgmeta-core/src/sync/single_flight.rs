//! Single-flight cache: concurrent identical requests share one computation.

use super::keyed::KeyedLocks;
use crate::cancel::CancellationToken;
use crate::error::Result;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::RwLock;

/// Caches accepted results per key and runs at most one factory per key at a
/// time.
///
/// A failing factory reports its error only to the caller that ran it.
/// Callers queued behind it find the cache still empty and run the factory
/// themselves.
pub struct SingleFlightCache<K, V> {
    values: RwLock<HashMap<K, V>>,
    slots: KeyedLocks<K>,
}

impl<K, V> Default for SingleFlightCache<K, V> {
    fn default() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            slots: KeyedLocks::default(),
        }
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone + Display + Send + 'static,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Get the cached value or compute it, caching every result.
    pub async fn get_or_compute<F, Fut>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        self.get_or_compute_with(key, &CancellationToken::new(), factory, |_| true)
            .await
    }

    /// Get the cached value or compute it.
    ///
    /// `accept` decides whether a computed value is cached; rejected values
    /// are still returned to this caller. Waiting for the key's slot honours
    /// `cancel`.
    pub async fn get_or_compute_with<F, Fut, A>(
        &self,
        key: K,
        cancel: &CancellationToken,
        factory: F,
        accept: A,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
        A: FnOnce(&V) -> bool,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let _slot = self.slots.acquire(key.clone(), cancel, None).await?;

        // Another caller may have finished while we waited for the slot
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = factory().await?;
        if accept(&value) {
            self.values
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(key, value.clone());
        }
        Ok(value)
    }

    /// Drop a cached value so the next request recomputes it.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live per-key slots (held or waited on).
    pub fn in_flight_slots(&self) -> usize {
        self.slots.len()
    }
}
