//! In-memory tier with cost and count bounded LRU eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Fast, volatile tier holding decoded values.
///
/// Implementations must be internally synchronized. The orchestrator calls
/// these methods from any thread, including async tasks, so they should not
/// block for long.
pub trait MemoryTier<V>: Send + Sync {
    /// Look up a value, marking it as recently used.
    fn get(&self, key: &str) -> Option<Arc<V>>;

    /// Insert or replace a value with the given cost.
    fn insert(&self, key: &str, value: Arc<V>, cost: u64);

    /// Remove a value. Absence is not an error.
    fn remove(&self, key: &str);

    /// Remove every value.
    fn clear(&self);

    /// Number of values held.
    fn len(&self) -> usize;

    /// Sum of the costs of all values held.
    fn total_cost(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Limits for [`MemoryCache`]. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Maximum total cost.
    pub cost_limit: Option<u64>,
    /// Maximum number of entries.
    pub count_limit: Option<usize>,
}

impl MemoryLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_cost_limit(mut self, limit: u64) -> Self {
        self.cost_limit = Some(limit);
        self
    }

    pub fn with_count_limit(mut self, limit: usize) -> Self {
        self.count_limit = Some(limit);
        self
    }
}

struct Entry<V> {
    value: Arc<V>,
    cost: u64,
    /// Position in the recency order
    tick: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, String>,
    next_tick: u64,
    total_cost: u64,
}

impl<V> Inner<V> {
    fn next_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn take(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        self.total_cost = self.total_cost.saturating_sub(entry.cost);
        Some(entry)
    }

    fn over(&self, limits: &MemoryLimits) -> bool {
        limits.cost_limit.is_some_and(|max| self.total_cost > max)
            || limits.count_limit.is_some_and(|max| self.entries.len() > max)
    }
}

/// Default memory tier: a thread-safe LRU map bounded by total cost and
/// entry count.
///
/// Limits are enforced after each insert by evicting least recently used
/// entries. The entry just inserted is never evicted, so a single value whose
/// cost exceeds the limit is still held (everything else is evicted).
pub struct MemoryCache<V> {
    inner: Mutex<Inner<V>>,
    limits: MemoryLimits,
}

impl<V> MemoryCache<V> {
    /// Create a new memory cache with the given limits.
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                total_cost: 0,
            }),
            limits,
        }
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    /// Check if a key is held, without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new(MemoryLimits::default())
    }
}

impl<V: Send + Sync> MemoryTier<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();

        let entry = inner.entries.get_mut(key)?;
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        let value = Arc::clone(&entry.value);

        if let Some(k) = inner.order.remove(&old_tick) {
            inner.order.insert(tick, k);
        }
        Some(value)
    }

    fn insert(&self, key: &str, value: Arc<V>, cost: u64) {
        let mut inner = self.inner.lock();
        inner.take(key);

        let tick = inner.next_tick();
        inner.entries.insert(key.to_string(), Entry { value, cost, tick });
        inner.order.insert(tick, key.to_string());
        inner.total_cost = inner.total_cost.saturating_add(cost);

        let mut evicted = 0usize;
        while inner.over(&self.limits) {
            let Some((&oldest, _)) = inner.order.first_key_value() else {
                break;
            };
            if oldest == tick {
                break;
            }
            if let Some(victim) = inner.order.get(&oldest).cloned() {
                inner.take(&victim);
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(
                evicted = evicted,
                entries = inner.entries.len(),
                total_cost = inner.total_cost,
                "Memory cache evicted LRU entries"
            );
        }
    }

    fn remove(&self, key: &str) {
        self.inner.lock().take(key);
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.total_cost = 0;
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn total_cost(&self) -> u64 {
        self.inner.lock().total_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(limits: MemoryLimits) -> MemoryCache<String> {
        MemoryCache::new(limits)
    }

    fn value(s: &str) -> Arc<String> {
        Arc::new(s.to_string())
    }

    #[test]
    fn test_insert_and_get() {
        let cache = cache(MemoryLimits::unbounded());
        cache.insert("a", value("alpha"), 5);

        assert_eq!(cache.get("a").as_deref(), Some(&"alpha".to_string()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 5);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_replace_updates_cost() {
        let cache = cache(MemoryLimits::unbounded());
        cache.insert("a", value("one"), 10);
        cache.insert("a", value("two"), 3);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 3);
        assert_eq!(cache.get("a").as_deref(), Some(&"two".to_string()));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = cache(MemoryLimits::unbounded());
        cache.insert("a", value("1"), 1);
        cache.insert("b", value("2"), 2);

        cache.remove("a");
        cache.remove("a");
        assert!(!cache.contains("a"));
        assert_eq!(cache.total_cost(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_huge_costs_saturate() {
        let cache = cache(MemoryLimits::unbounded());
        cache.insert("a", value("1"), u64::MAX);
        cache.insert("b", value("2"), 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.total_cost(), u64::MAX);

        cache.remove("a");
        cache.remove("b");
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_count_limit_evicts_lru() {
        let cache = cache(MemoryLimits::unbounded().with_count_limit(2));
        cache.insert("a", value("1"), 0);
        cache.insert("b", value("2"), 0);

        // Touch "a" so "b" becomes least recently used
        cache.get("a");
        cache.insert("c", value("3"), 0);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_cost_limit_evicts_until_within() {
        let cache = cache(MemoryLimits::unbounded().with_cost_limit(100));
        cache.insert("a", value("1"), 40);
        cache.insert("b", value("2"), 40);
        cache.insert("c", value("3"), 40);

        assert_eq!(cache.total_cost(), 80);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_oversized_item_is_kept_alone() {
        let cache = cache(MemoryLimits::unbounded().with_cost_limit(100));
        cache.insert("a", value("1"), 30);
        cache.insert("b", value("2"), 30);
        cache.insert("huge", value("3"), 500);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("huge"));
        assert_eq!(cache.total_cost(), 500);

        // Next insert evicts it
        cache.insert("c", value("4"), 10);
        assert!(!cache.contains("huge"));
        assert_eq!(cache.total_cost(), 10);
    }

    #[test]
    fn test_zero_count_limit_keeps_latest() {
        let cache = cache(MemoryLimits::unbounded().with_count_limit(0));
        cache.insert("a", value("1"), 1);
        assert_eq!(cache.len(), 1);
        cache.insert("b", value("2"), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_concurrent_inserts_respect_count_limit() {
        let cache = Arc::new(cache(MemoryLimits::unbounded().with_count_limit(16)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.insert(&format!("{}-{}", t, i), value("v"), 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 16);
        assert_eq!(cache.total_cost(), 16);
    }
}
