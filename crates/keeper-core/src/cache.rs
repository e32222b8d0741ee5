//! Bounded least-recently-used cache
//!
//! One instance lives for the whole process and is shared by every
//! concurrent request. Entries are an optimization only: any miss must be
//! recoverable by asking upstream again, so the cache never enforces expiry
//! itself. Callers check staleness of what they read.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use tracing::trace;

/// Default number of entries kept before eviction starts.
pub const DEFAULT_CAPACITY: usize = 500;

struct Slot<V> {
    value: V,
    /// Recency stamp; also the key of this entry in `Inner::order`.
    stamp: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Slot<V>>,
    /// Stamp -> key, oldest first.
    order: BTreeMap<u64, K>,
    clock: u64,
}

impl<K, V> Inner<K, V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Size-bounded LRU map, safe to share across tasks and threads.
///
/// Every operation takes a single short-lived lock, so insertion and
/// eviction are atomic with respect to concurrent readers and writers.
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: BTreeMap::new(),
                clock: 0,
            }),
            capacity,
        }
    }

    /// Look up a key and mark it as most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.inner.lock();
        let stamp = guard.tick();
        let Inner { entries, order, .. } = &mut *guard;

        let slot = entries.get_mut(key)?;
        let previous = std::mem::replace(&mut slot.stamp, stamp);
        if let Some(owned) = order.remove(&previous) {
            order.insert(stamp, owned);
        }
        Some(slot.value.clone())
    }

    /// Look up a key without touching its recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().entries.get(key).map(|slot| slot.value.clone())
    }

    /// Insert or replace a value, marking it as most recently used.
    ///
    /// Returns the previous value for `key`, if any. When the insert pushes
    /// the cache over capacity the least recently used entry is dropped.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.inner.lock();
        let stamp = guard.tick();
        let Inner { entries, order, .. } = &mut *guard;

        if let Some(slot) = entries.get_mut(&key) {
            order.remove(&slot.stamp);
            order.insert(stamp, key);
            slot.stamp = stamp;
            return Some(std::mem::replace(&mut slot.value, value));
        }

        entries.insert(key.clone(), Slot { value, stamp });
        order.insert(stamp, key);

        while entries.len() > self.capacity {
            match order.pop_first() {
                Some((_, oldest)) => {
                    entries.remove(&oldest);
                    trace!(capacity = self.capacity, "Evicted least recently used cache entry");
                }
                None => break,
            }
        }

        None
    }

    /// Remove a key, returning its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.inner.lock();
        let Inner { entries, order, .. } = &mut *guard;

        let slot = entries.remove(key)?;
        order.remove(&slot.stamp);
        Some(slot.value)
    }

    /// Check whether a key is present without touching its recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().entries.contains_key(key)
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.entries.clear();
        guard.order.clear();
    }

    /// Keys ordered from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().order.values().cloned().collect()
    }
}

impl<K, V> Default for LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.inner.lock().entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
