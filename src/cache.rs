//! Capacity-bounded, recency-evicting key to item-list store.

use std::collections::HashMap;
use std::hash::Hash;

/// Bounded store mapping a key to an ordered item list.
///
/// Capacity counts stored items, not keys. Appending to a key refreshes that
/// key's recency; when the total would exceed capacity, the least-recently
/// touched key's whole list is evicted. Reads never affect recency.
pub struct BoundedLog<K, V> {
    capacity: usize,
    stored: usize,
    entries: HashMap<K, Vec<V>>,
    // Recency order, least recent first.
    order: Vec<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedLog<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stored: 0,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total stored items across all keys.
    pub fn len(&self) -> usize {
        self.stored
    }

    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Append `value` to `key`'s list, refreshing its recency, then evict
    /// least-recently-touched keys until the capacity holds. A single key
    /// over capacity evicts itself.
    pub fn add(&mut self, key: K, value: V) {
        self.order.retain(|k| k != &key);
        self.order.push(key.clone());
        self.entries.entry(key).or_default().push(value);
        self.stored += 1;

        while self.stored > self.capacity {
            if self.order.is_empty() {
                break;
            }
            let victim = self.order.remove(0);
            if let Some(items) = self.entries.remove(&victim) {
                self.stored -= items.len();
            }
        }
    }

    /// Read-only lookup; does not touch recency.
    pub fn get(&self, key: &K) -> Option<&[V]> {
        self.entries.get(key).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_accumulate_per_key() {
        let mut log = BoundedLog::new(10);
        log.add("a", 1);
        log.add("a", 2);
        log.add("b", 3);

        assert_eq!(log.get(&"a"), Some(&[1, 2][..]));
        assert_eq!(log.get(&"b"), Some(&[3][..]));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_overflow_evicts_least_recent_key_entirely() {
        let mut log = BoundedLog::new(3);
        log.add("a", 1);
        log.add("a", 2);
        log.add("b", 3);
        // Fourth item: "a" is least recent, its whole list goes.
        log.add("c", 4);

        assert!(log.get(&"a").is_none());
        assert_eq!(log.get(&"b"), Some(&[3][..]));
        assert_eq!(log.get(&"c"), Some(&[4][..]));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_append_refreshes_recency() {
        let mut log = BoundedLog::new(3);
        log.add("a", 1);
        log.add("b", 2);
        // Touch "a": "b" becomes the eviction candidate.
        log.add("a", 3);
        log.add("c", 4);

        assert!(log.get(&"b").is_none());
        assert_eq!(log.get(&"a"), Some(&[1, 3][..]));
    }

    #[test]
    fn test_get_does_not_refresh_recency() {
        let mut log = BoundedLog::new(2);
        log.add("a", 1);
        log.add("b", 2);
        assert!(log.get(&"a").is_some());
        // "a" was only read, so it is still the least recent.
        log.add("c", 3);

        assert!(log.get(&"a").is_none());
        assert!(log.get(&"b").is_some());
    }

    #[test]
    fn test_single_key_over_capacity_evicts_itself() {
        let mut log = BoundedLog::new(2);
        log.add("a", 1);
        log.add("a", 2);
        log.add("a", 3);

        assert!(log.get(&"a").is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut log = BoundedLog::new(5);
        for i in 0..50 {
            log.add(i % 7, i);
            assert!(log.len() <= 5);
        }
    }
}
