//! Bounded per-key history cache.
//!
//! Keeps a short history of values per key (most recent generations, scores,
//! retrieved chunks) with two independent bounds: each key retains at most
//! its configured number of values (oldest dropped first), and the cache
//! retains at most `max_keys` keys (least-recently-used key dropped first).
//! Purely synchronous and capacity-bounded; there is no background sweep.

use std::collections::{HashMap, VecDeque};

/// Default number of keys retained.
pub const DEFAULT_MAX_KEYS: usize = 5;

/// Default number of values retained per key.
pub const DEFAULT_MAX_SIZE: usize = 5;

#[derive(Debug, Clone)]
struct HistoryBucket<V> {
    values: VecDeque<V>,
    /// Logical timestamp of the last read or write.
    last_touch: u64,
}

/// Recency-ordered cache of bounded per-key value history.
///
/// Reads and writes both count as uses: the evicted key is the least
/// recently *used* one, not the oldest inserted.
#[derive(Debug, Clone)]
pub struct HistoryCache<V> {
    buckets: HashMap<String, HistoryBucket<V>>,
    /// Per-key capacity overrides.
    max_sizes: HashMap<String, usize>,
    default_max_size: usize,
    max_keys: usize,
    /// Logical clock; bumped on every read and write.
    clock: u64,
}

impl<V> HistoryCache<V> {
    /// Creates a cache with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_KEYS, DEFAULT_MAX_SIZE)
    }

    /// Creates a cache retaining at most `max_keys` keys and, per key,
    /// at most `default_max_size` values. Zero limits are treated as one.
    #[must_use]
    pub fn with_limits(max_keys: usize, default_max_size: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            max_sizes: HashMap::new(),
            default_max_size: default_max_size.max(1),
            max_keys: max_keys.max(1),
            clock: 0,
        }
    }

    /// Appends `value` to `key`'s history and marks the key as most
    /// recently used.
    ///
    /// Values above the key's capacity are dropped oldest-first. Inserting
    /// a previously unseen key at full capacity evicts the least-recently
    /// used key first.
    pub fn put(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        self.clock += 1;
        let capacity = self.capacity_of(&key);

        if !self.buckets.contains_key(&key) && self.buckets.len() >= self.max_keys {
            if let Some(lru_key) = self.find_lru_key() {
                self.buckets.remove(&lru_key);
            }
        }

        let bucket = self.buckets.entry(key).or_insert_with(|| HistoryBucket {
            values: VecDeque::new(),
            last_touch: 0,
        });
        bucket.last_touch = self.clock;
        bucket.values.push_back(value);
        while bucket.values.len() > capacity {
            bucket.values.pop_front();
        }
    }

    /// The most recent value for `key`, marking the key as most recently
    /// used on a hit.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.clock += 1;
        let clock = self.clock;
        let bucket = self.buckets.get_mut(key)?;
        bucket.last_touch = clock;
        bucket.values.back()
    }

    /// The retained history for `key`, oldest value first, marking the key
    /// as most recently used on a hit.
    pub fn history(&mut self, key: &str) -> Option<&VecDeque<V>> {
        self.clock += 1;
        let clock = self.clock;
        let bucket = self.buckets.get_mut(key)?;
        bucket.last_touch = clock;
        Some(&bucket.values)
    }

    /// Overrides the capacity for one key, trimming its existing history
    /// if it already exceeds the new bound.
    pub fn set_max_size(&mut self, key: impl Into<String>, max_size: usize) {
        let key = key.into();
        let max_size = max_size.max(1);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            while bucket.values.len() > max_size {
                bucket.values.pop_front();
            }
        }
        self.max_sizes.insert(key, max_size);
    }

    /// Removes one key's history. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.buckets.remove(key).is_some()
    }

    /// Removes all history. Capacity overrides are kept.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    /// Number of keys currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no keys are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Whether `key` is currently retained. Does not bump recency.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    fn capacity_of(&self, key: &str) -> usize {
        self.max_sizes.get(key).copied().unwrap_or(self.default_max_size)
    }

    /// The least-recently-used key.
    fn find_lru_key(&self) -> Option<String> {
        self.buckets
            .iter()
            .min_by_key(|(_, bucket)| bucket.last_touch)
            .map(|(key, _)| key.clone())
    }
}

impl<V> Default for HistoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get_latest() {
        let mut cache = HistoryCache::new();
        cache.put("k", 1);
        cache.put("k", 2);

        assert_eq!(cache.get("k"), Some(&2));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_per_key_bound_drops_oldest() {
        let mut cache = HistoryCache::with_limits(5, 3);
        for i in 0..6 {
            cache.put("k", i);
        }

        let history: Vec<i32> = cache.history("k").unwrap().iter().copied().collect();
        assert_eq!(history, vec![3, 4, 5]);
    }

    #[test]
    fn test_per_key_override_applies() {
        let mut cache = HistoryCache::with_limits(5, 3);
        cache.set_max_size("wide", 5);

        for i in 0..10 {
            cache.put("wide", i);
            cache.put("narrow", i);
        }

        assert_eq!(cache.history("wide").unwrap().len(), 5);
        assert_eq!(cache.history("narrow").unwrap().len(), 3);
    }

    #[test]
    fn test_set_max_size_trims_existing_history() {
        let mut cache = HistoryCache::with_limits(5, 5);
        for i in 0..5 {
            cache.put("k", i);
        }

        cache.set_max_size("k", 2);
        let history: Vec<i32> = cache.history("k").unwrap().iter().copied().collect();
        assert_eq!(history, vec![3, 4]);
    }

    #[test]
    fn test_key_eviction_is_lru_not_fifo() {
        let mut cache = HistoryCache::with_limits(2, 5);
        cache.put("first", 1);
        cache.put("second", 2);

        // Reading bumps recency: "first" is now the most recently used.
        assert_eq!(cache.get("first"), Some(&1));

        cache.put("third", 3);

        assert!(cache.contains_key("first"));
        assert!(!cache.contains_key("second"));
        assert!(cache.contains_key("third"));
    }

    #[test]
    fn test_key_count_never_exceeds_max_keys() {
        let mut cache = HistoryCache::with_limits(3, 2);
        for i in 0..10 {
            cache.put(format!("key-{i}"), i);
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn test_put_to_existing_key_does_not_evict() {
        let mut cache = HistoryCache::with_limits(2, 5);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 3);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key("b"));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = HistoryCache::new();
        cache.put("a", 1);
        cache.put("b", 2);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_limits_are_clamped() {
        let mut cache = HistoryCache::with_limits(0, 0);
        cache.put("k", 1);
        assert_eq!(cache.get("k"), Some(&1));
        assert_eq!(cache.len(), 1);
    }
}
