use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::core::Result;

struct Slot<V> {
    /// Insertion order, used to hand entries back in load order.
    seq: u64,
    cell: Arc<OnceCell<V>>,
}

/// One value per key, loaded at most once.
///
/// Concurrent callers asking for the same key share a single in-flight load.
/// Different keys never wait on each other: the map lock is only held to
/// find or create a slot, never while loading.
pub struct IdentityMap<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    next_seq: AtomicU64,
}

impl<K, V> IdentityMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Returns the value for `key`, running `loader` if nobody has loaded it
    /// yet. A failed load leaves no entry behind, so a later call retries.
    pub async fn get_or_load<F, Fut>(&self, key: K, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = {
            let mut slots = self.slots.lock()?;
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                cell: Arc::new(OnceCell::new()),
            });
            Arc::clone(&slot.cell)
        };

        match cell.get_or_try_init(loader).await {
            Ok(value) => Ok(value.clone()),
            Err(err) => {
                self.discard_failed(&key, &cell)?;
                Err(err)
            }
        }
    }

    // Drop the slot only if nobody else is waiting on it; a waiter will run
    // its own load and clean up after itself if that fails too.
    fn discard_failed(&self, key: &K, cell: &Arc<OnceCell<V>>) -> Result<()> {
        let mut slots = self.slots.lock()?;
        let unused = slots.get(key).is_some_and(|slot| {
            Arc::ptr_eq(&slot.cell, cell) && !cell.initialized() && Arc::strong_count(cell) == 2
        });
        if unused {
            slots.remove(key);
        }
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let slots = self.slots.lock().ok()?;
        slots.get(key).and_then(|slot| slot.cell.get().cloned())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Loaded entries in the order they were first requested.
    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        let slots = self.slots.lock()?;
        let mut loaded: Vec<(u64, K, V)> = slots
            .iter()
            .filter_map(|(key, slot)| {
                slot.cell
                    .get()
                    .map(|value| (slot.seq, key.clone(), value.clone()))
            })
            .collect();
        loaded.sort_by_key(|(seq, _, _)| *seq);
        Ok(loaded.into_iter().map(|(_, key, value)| (key, value)).collect())
    }

    /// Number of loaded entries.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|slot| slot.cell.initialized()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every entry. Values already handed out stay valid.
    pub fn clear(&self) -> Result<()> {
        self.slots.lock()?.clear();
        Ok(())
    }
}

impl<K, V> Default for IdentityMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
