//! Entry map, indexed min-heap priority ordering, and the single-flight
//! in-flight registry — all guarded by the cache's one primary lock.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::config::CacheConfig;
use crate::entry::{Entry, ExpiresAt};
use crate::error::Error;

/// Everything protected by [`crate::cache::Cache`]'s primary
/// `parking_lot::Mutex`: the entry map, its priority heap, the single-flight
/// in-flight registry, runtime configuration, and the open/closed flag.
pub(crate) struct Store<V> {
    entries: HashMap<String, Entry<V>>,
    /// Binary min-heap of keys, ordered by `entries[key].expires_at`. Each
    /// entry caches its own position (`Entry::heap_index`) so removal and
    /// re-sifting after a TTL change are O(log n).
    heap: Vec<String>,
    pub(crate) inflight: HashMap<String, broadcast::Sender<Result<V, Error>>>,
    pub(crate) closed: bool,
    pub(crate) config: CacheConfig,
}

impl<V> Store<V> {
    pub(crate) fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            heap: Vec::new(),
            inflight: HashMap::new(),
            closed: false,
            config,
        }
    }

    pub(crate) fn len(&self) -> usize {
        debug_assert_eq!(self.entries.len(), self.heap.len());
        self.entries.len()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Entry<V>> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut Entry<V>> {
        self.entries.get_mut(key)
    }

    pub(crate) fn peek_earliest(&self) -> Option<ExpiresAt> {
        self.heap.first().map(|k| self.entries[k].expires_at)
    }

    /// Insert or overwrite `key`. Returns `(created, previous)`: `created`
    /// is `true` when no entry existed for this key before (drives the
    /// `NewItem` callback), `previous` is the entry that was replaced.
    pub(crate) fn insert(&mut self, key: String, entry: Entry<V>) -> (bool, Option<Entry<V>>) {
        if self.entries.contains_key(&key) {
            let previous = self.remove(&key);
            self.push_new(key, entry);
            (false, previous)
        } else {
            self.push_new(key, entry);
            (true, None)
        }
    }

    fn push_new(&mut self, key: String, mut entry: Entry<V>) {
        let idx = self.heap.len();
        entry.heap_index = idx;
        self.entries.insert(key.clone(), entry);
        self.heap.push(key);
        self.sift_up(idx);
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.heap_remove_at(entry.heap_index);
        Some(entry)
    }

    /// Re-sift the heap after `key`'s `expires_at` changed in place (TTL
    /// extension on hit, or check-expiration retention).
    pub(crate) fn resift(&mut self, key: &str) {
        if let Some(idx) = self.entries.get(key).map(|e| e.heap_index) {
            self.sift_down(idx);
            self.sift_up(idx);
        }
    }

    /// Pop the heap root if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<(String, Entry<V>)> {
        let due = self
            .heap
            .first()
            .map(|k| self.entries[k].expires_at.is_due(now))
            .unwrap_or(false);
        if !due {
            return None;
        }
        let key = self.heap[0].clone();
        let entry = self.remove(&key)?;
        Some((key, entry))
    }

    /// Key of the soonest-to-expire entry, if any (the size-eviction
    /// victim).
    pub(crate) fn earliest_key(&self) -> Option<&str> {
        self.heap.first().map(|s| s.as_str())
    }

    /// Remove and return every live entry, for `purge`/`close`.
    pub(crate) fn drain_all(&mut self) -> Vec<(String, Entry<V>)> {
        let keys: Vec<String> = std::mem::take(&mut self.heap);
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k, e)))
            .collect()
    }

    fn heap_remove_at(&mut self, idx: usize) {
        let last = self.heap.len() - 1;
        if idx != last {
            self.heap.swap(idx, last);
        }
        self.heap.pop();
        if idx < self.heap.len() {
            let moved_key = self.heap[idx].clone();
            if let Some(e) = self.entries.get_mut(&moved_key) {
                e.heap_index = idx;
            }
            self.sift_down(idx);
            self.sift_up(idx);
        }
    }

    fn expires_at_of(&self, idx: usize) -> ExpiresAt {
        self.entries[&self.heap[idx]].expires_at
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        let ka = self.heap[a].clone();
        let kb = self.heap[b].clone();
        self.entries.get_mut(&ka).expect("heap/entry desync").heap_index = a;
        self.entries.get_mut(&kb).expect("heap/entry desync").heap_index = b;
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.expires_at_of(parent) <= self.expires_at_of(i) {
                break;
            }
            self.swap(parent, i);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let l = 2 * i + 1;
            let r = 2 * i + 2;
            let mut smallest = i;
            if l < len && self.expires_at_of(l) < self.expires_at_of(smallest) {
                smallest = l;
            }
            if r < len && self.expires_at_of(r) < self.expires_at_of(smallest) {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.swap(smallest, i);
            i = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Ttl;

    #[test]
    fn heap_pops_in_expiry_order() {
        let base = Instant::now();
        let mut store: Store<i32> = Store::new(CacheConfig::default());

        store.insert("c".into(), Entry::new(3, base, Ttl::After(std::time::Duration::from_secs(3)), None));
        store.insert("a".into(), Entry::new(1, base, Ttl::After(std::time::Duration::from_secs(1)), None));
        store.insert("b".into(), Entry::new(2, base, Ttl::After(std::time::Duration::from_secs(2)), None));

        assert_eq!(store.len(), 3);
        assert_eq!(store.earliest_key(), Some("a"));

        store.remove("a");
        assert_eq!(store.earliest_key(), Some("b"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn resift_after_extension_reorders_heap() {
        let base = Instant::now();
        let mut store: Store<i32> = Store::new(CacheConfig::default());

        store.insert("a".into(), Entry::new(1, base, Ttl::After(std::time::Duration::from_millis(10)), None));
        store.insert("b".into(), Entry::new(2, base, Ttl::After(std::time::Duration::from_secs(60)), None));

        assert_eq!(store.earliest_key(), Some("a"));

        if let Some(e) = store.get_mut("a") {
            e.expires_at = crate::entry::ExpiresAt::At(base + std::time::Duration::from_secs(120));
        }
        store.resift("a");

        assert_eq!(store.earliest_key(), Some("b"));
    }

    #[test]
    fn overwrite_is_not_creation() {
        let base = Instant::now();
        let mut store: Store<i32> = Store::new(CacheConfig::default());

        let (created, prev) = store.insert(
            "a".into(),
            Entry::new(1, base, Ttl::After(std::time::Duration::from_secs(1)), None),
        );
        assert!(created);
        assert!(prev.is_none());

        let (created, prev) = store.insert(
            "a".into(),
            Entry::new(2, base, Ttl::After(std::time::Duration::from_secs(1)), None),
        );
        assert!(!created);
        assert_eq!(prev.unwrap().value, 1);
        assert_eq!(store.len(), 1);
    }
}
