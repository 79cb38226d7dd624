//! Concurrency-safe collections used to hand out work and remember recent
//! device/account state without races.
//!
//! All three types serialize access through a single internal lock for the
//! collection's lifetime; operations are serialized, not lock-free.
//! Callers must not assume atomicity across two separate calls: a
//! `try_take` followed by a `try_add` is not transactional.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

// ============================================================================
// SafeCollection
// ============================================================================

/// A mutex-guarded dynamic array with FIFO hand-out semantics.
///
/// # Example
/// ```
/// use scan_dispatch::SafeCollection;
///
/// let queue: SafeCollection<i32> = SafeCollection::new();
/// queue.try_add(1);
/// queue.try_add(2);
/// assert_eq!(queue.try_take(), Some(1));
/// ```
#[derive(Debug, Default)]
pub struct SafeCollection<T> {
    items: Mutex<Vec<T>>,
}

impl<T> SafeCollection<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Append an item.
    pub fn try_add(&self, item: T) {
        self.lock().push(item);
    }

    /// Remove and return the oldest item.
    pub fn try_take(&self) -> Option<T> {
        let mut items = self.lock();
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }

    /// Remove and return up to `n` items, preserving relative order.
    ///
    /// `n` may exceed the available count, in which case everything is
    /// returned and the collection is left empty.
    pub fn take(&self, n: usize) -> Vec<T> {
        let mut items = self.lock();
        let count = n.min(items.len());
        items.drain(..count).collect()
    }

    /// Remove every item matching the predicate, returning how many went.
    pub fn remove<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|item| !predicate(item));
        before - items.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        // A poisoned lock means a panic mid-push/drain on a Vec, which
        // cannot leave it structurally broken; keep serving.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Clone> SafeCollection<T> {
    /// First item matching the predicate, cloned out under the lock.
    pub fn get<F>(&self, predicate: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        self.lock().iter().find(|item| predicate(item)).cloned()
    }

    /// Defensive snapshot; iteration over it never races with mutation.
    pub fn to_vec(&self) -> Vec<T> {
        self.lock().clone()
    }
}

// ============================================================================
// TimedMap
// ============================================================================

/// Per-key, time-ordered `(timestamp, value)` history with "value as of
/// time T" lookups.
///
/// Used for remembering, e.g., which pokestop a device most recently spun:
/// `get(device, t)` answers what the value was at `t`, not only at exact
/// sample times.
#[derive(Debug, Default)]
pub struct TimedMap<K, V> {
    entries: Mutex<HashMap<K, Vec<(u64, V)>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TimedMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record `value` for `key` at `timestamp`.
    ///
    /// Timestamps normally arrive monotonically per key, making this an
    /// append; out-of-order samples are inserted at their sorted position
    /// so lookups stay correct.
    pub fn set(&self, key: K, value: V, timestamp: u64) {
        let mut entries = self.lock();
        let list = entries.entry(key).or_default();
        let idx = list.partition_point(|(t, _)| *t <= timestamp);
        list.insert(idx, (timestamp, value));
    }

    /// Value as of `timestamp`: the entry with the greatest recorded time
    /// ≤ the query time. `None` if the key is unknown or the query
    /// precedes all entries.
    pub fn get(&self, key: &K, timestamp: u64) -> Option<V> {
        let entries = self.lock();
        let list = entries.get(key)?;
        let idx = list.partition_point(|(t, _)| *t <= timestamp);
        if idx == 0 {
            None
        } else {
            Some(list[idx - 1].1.clone())
        }
    }

    /// Most recent value for `key`, regardless of time.
    pub fn latest(&self, key: &K) -> Option<V> {
        let entries = self.lock();
        entries.get(key)?.last().map(|(_, v)| v.clone())
    }

    /// Number of samples recorded for `key`.
    pub fn history_len(&self, key: &K) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    /// Snapshot of the known keys.
    pub fn keys(&self) -> Vec<K> {
        self.lock().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Vec<(u64, V)>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// TimedMapCollection
// ============================================================================

/// A [`TimedMap`] with each key's history capped to a fixed length.
///
/// On overflow the oldest entry is evicted (FIFO, not LRU) so the window
/// always holds the most recent `capacity` samples.
#[derive(Debug)]
pub struct TimedMapCollection<K, V> {
    inner: TimedMap<K, V>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TimedMapCollection<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: TimedMap::new(),
            capacity,
        }
    }

    pub fn set(&self, key: K, value: V, timestamp: u64) {
        let mut entries = self.inner.lock();
        let list = entries.entry(key).or_default();
        let idx = list.partition_point(|(t, _)| *t <= timestamp);
        list.insert(idx, (timestamp, value));
        while list.len() > self.capacity {
            list.remove(0);
        }
    }

    pub fn get(&self, key: &K, timestamp: u64) -> Option<V> {
        self.inner.get(key, timestamp)
    }

    pub fn latest(&self, key: &K) -> Option<V> {
        self.inner.latest(key)
    }

    /// Oldest retained sample for `key`, with its timestamp.
    pub fn oldest_entry(&self, key: &K) -> Option<(u64, V)> {
        let entries = self.inner.lock();
        entries.get(key)?.first().cloned()
    }

    /// Newest retained sample for `key`, with its timestamp.
    pub fn latest_entry(&self, key: &K) -> Option<(u64, V)> {
        let entries = self.inner.lock();
        entries.get(key)?.last().cloned()
    }

    pub fn history_len(&self, key: &K) -> usize {
        self.inner.history_len(key)
    }

    /// Snapshot of the known keys.
    pub fn keys(&self) -> Vec<K> {
        self.inner.keys()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
