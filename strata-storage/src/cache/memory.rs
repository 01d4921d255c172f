//! In-process bounded store.
//!
//! Serves as the L1 tier of every cache manager and, unbounded, as a
//! reference L2 for single-process deployments and tests. All work happens
//! under one mutex and never suspends; the async [`CacheStore`] impl simply
//! delegates to the synchronous methods.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use strata_core::{
    system_clock, CacheEntry, EvictionPolicy, SharedClock, StoreError, StrataResult, Timestamp,
};
use tracing::{debug, trace};

use super::{CacheStore, KeyPattern};

/// Upper bound on what a [`MemoryStore`] keeps resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// At most this many entries.
    Entries(usize),
    /// At most this many estimated bytes across all entries.
    Bytes(u64),
    Unbounded,
}

struct Slot<V> {
    entry: CacheEntry<V>,
    /// Tick of the insert that created this slot.
    inserted: u64,
    /// Tick of the last insert or read.
    touched: u64,
}

struct Inner<V> {
    slots: HashMap<String, Slot<V>>,
    /// touched tick -> key; first is least recently used.
    recency: BTreeMap<u64, String>,
    /// inserted tick -> key; first is oldest.
    arrivals: BTreeMap<u64, String>,
    tick: u64,
    bytes: u64,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            recency: BTreeMap::new(),
            arrivals: BTreeMap::new(),
            tick: 0,
            bytes: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert(&mut self, key: String, entry: CacheEntry<V>) {
        let tick = self.next_tick();
        self.bytes = self.bytes.saturating_add(entry.size);
        self.recency.insert(tick, key.clone());
        self.arrivals.insert(tick, key.clone());
        self.slots.insert(
            key,
            Slot {
                entry,
                inserted: tick,
                touched: tick,
            },
        );
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(&slot.touched);
        self.arrivals.remove(&slot.inserted);
        self.bytes = self.bytes.saturating_sub(slot.entry.size);
        Some(slot.entry)
    }

    /// Record a read and move the key to the back of the access order.
    fn touch(&mut self, key: &str, now: Timestamp) -> Option<&CacheEntry<V>> {
        let tick = self.next_tick();
        let slot = self.slots.get_mut(key)?;
        self.recency.remove(&slot.touched);
        self.recency.insert(tick, key.to_string());
        slot.touched = tick;
        slot.entry.touch(now);
        Some(&slot.entry)
    }

    /// Drop the entry if it has expired. Returns true if the key is still live.
    fn retain_live(&mut self, key: &str, now: Timestamp) -> bool {
        let expired = match self.slots.get(key) {
            None => return false,
            Some(slot) => slot.entry.is_expired(now),
        };
        if expired {
            self.remove(key);
        }
        !expired
    }

    fn purge_expired(&mut self, now: Timestamp) {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn victim(&self, policy: EvictionPolicy) -> Option<String> {
        let chosen = match policy {
            EvictionPolicy::Lru => return self.recency.values().next().cloned(),
            EvictionPolicy::Fifo => return self.arrivals.values().next().cloned(),
            EvictionPolicy::Lfu => self
                .slots
                .iter()
                .min_by_key(|(_, slot)| (slot.entry.access_count, slot.touched)),
            EvictionPolicy::Ttl => self
                .slots
                .iter()
                .min_by_key(|(_, slot)| (slot.entry.expires_at, slot.touched)),
            EvictionPolicy::Size => self
                .slots
                .iter()
                .max_by_key(|(_, slot)| (slot.entry.size, Reverse(slot.touched))),
        };
        chosen.map(|(key, _)| key.clone())
    }
}

/// Thread-safe in-memory store with policy-driven eviction and lazy expiry.
///
/// Expired entries are removed when they are next looked at (`get`, `has`,
/// `keys`); there is no background sweeper. When an insert would exceed the
/// [`Capacity`], victims are chosen by the configured [`EvictionPolicy`]
/// until the new entry fits. Replacing an existing key never evicts another
/// key in entry-counted mode.
pub struct MemoryStore<V> {
    inner: Mutex<Inner<V>>,
    capacity: Capacity,
    policy: EvictionPolicy,
    clock: SharedClock,
    evictions: AtomicU64,
}

impl<V: Clone> MemoryStore<V> {
    pub fn new(capacity: Capacity, policy: EvictionPolicy, clock: SharedClock) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            capacity,
            policy,
            clock,
            evictions: AtomicU64::new(0),
        }
    }

    /// LRU store holding at most `max` entries, on the system clock.
    pub fn with_max_entries(max: usize) -> Self {
        Self::new(Capacity::Entries(max), EvictionPolicy::Lru, system_clock())
    }

    /// Store that never evicts, on the system clock.
    pub fn unbounded() -> Self {
        Self::new(Capacity::Unbounded, EvictionPolicy::Lru, system_clock())
    }

    /// Replace the clock used for expiry checks.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> StrataResult<MutexGuard<'_, Inner<V>>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    /// Fetch a copy of a live entry, recording the read.
    pub fn lookup(&self, key: &str) -> StrataResult<Option<CacheEntry<V>>> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        if !inner.retain_live(key, now) {
            return Ok(None);
        }
        Ok(inner.touch(key, now).cloned())
    }

    /// Whether a live entry exists. Does not count as a read.
    pub fn contains(&self, key: &str) -> StrataResult<bool> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        Ok(inner.retain_live(key, now))
    }

    /// Insert or replace an entry, evicting as needed.
    ///
    /// In byte-budgeted mode an entry larger than the whole budget is not
    /// admitted; any previous version of the key is still dropped.
    pub fn insert(&self, key: &str, entry: CacheEntry<V>) -> StrataResult<()> {
        let mut inner = self.lock()?;
        let replaced = inner.remove(key).is_some();

        match self.capacity {
            Capacity::Entries(max) => {
                if max == 0 {
                    return Ok(());
                }
                if !replaced {
                    while inner.slots.len() >= max {
                        if !self.evict_one(&mut inner) {
                            break;
                        }
                    }
                }
            }
            Capacity::Bytes(max) => {
                if entry.size > max {
                    debug!(key, size = entry.size, budget = max, "Entry exceeds byte budget, not admitted");
                    return Ok(());
                }
                while inner.bytes.saturating_add(entry.size) > max {
                    if !self.evict_one(&mut inner) {
                        break;
                    }
                }
            }
            Capacity::Unbounded => {}
        }

        inner.insert(key.to_string(), entry);
        Ok(())
    }

    fn evict_one(&self, inner: &mut Inner<V>) -> bool {
        match inner.victim(self.policy) {
            Some(key) => {
                inner.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, policy = %self.policy, "Evicted");
                true
            }
            None => false,
        }
    }

    /// Remove an entry. Returns true if it was resident.
    pub fn remove(&self, key: &str) -> StrataResult<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    /// Remove every entry for which `predicate` holds.
    ///
    /// Returns the keys of the removed entries that had not yet expired.
    pub fn remove_where<F>(&self, predicate: F) -> StrataResult<Vec<String>>
    where
        F: Fn(&CacheEntry<V>) -> bool,
    {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        let doomed: Vec<(String, bool)> = inner
            .slots
            .iter()
            .filter(|(_, slot)| predicate(&slot.entry))
            .map(|(key, slot)| (key.clone(), !slot.entry.is_expired(now)))
            .collect();
        let mut live = Vec::with_capacity(doomed.len());
        for (key, was_live) in doomed {
            inner.remove(&key);
            if was_live {
                live.push(key);
            }
        }
        live.sort();
        Ok(live)
    }

    /// Drop everything. The eviction counter is left alone.
    pub fn purge(&self) -> StrataResult<()> {
        *self.lock()? = Inner::new();
        Ok(())
    }

    /// Live keys matching `pattern` (all live keys for `None`), sorted.
    pub fn keys_matching(&self, pattern: Option<&KeyPattern>) -> StrataResult<Vec<String>> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner.purge_expired(now);
        let mut keys: Vec<String> = inner
            .slots
            .keys()
            .filter(|key| pattern.map_or(true, |p| p.matches(key)))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Resident entries, including expired ones not yet purged. 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the estimated sizes of resident entries.
    pub fn resident_bytes(&self) -> u64 {
        self.inner.lock().map(|inner| inner.bytes).unwrap_or(0)
    }

    /// Entries removed to make room since construction.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }
}

impl<V> fmt::Debug for MemoryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.inner.lock().map(|inner| inner.slots.len()).ok();
        f.debug_struct("MemoryStore")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &len)
            .field("evictions", &self.evictions.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> StrataResult<Option<CacheEntry<V>>> {
        self.lookup(key)
    }

    async fn set(&self, key: &str, entry: CacheEntry<V>) -> StrataResult<()> {
        self.insert(key, entry)
    }

    async fn delete(&self, key: &str) -> StrataResult<bool> {
        self.remove(key)
    }

    async fn has(&self, key: &str) -> StrataResult<bool> {
        self.contains(key)
    }

    async fn clear(&self) -> StrataResult<()> {
        self.purge()
    }

    async fn keys(&self, pattern: Option<&str>) -> StrataResult<Vec<String>> {
        let pattern = KeyPattern::compile_optional(pattern)?;
        self.keys_matching(pattern.as_ref())
    }

    async fn size(&self) -> StrataResult<usize> {
        Ok(self.lock()?.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use strata_core::{Clock, ManualClock, StrataError};

    fn entry(clock: &ManualClock, key: &str, value: u32, ttl_secs: u64) -> CacheEntry<u32> {
        CacheEntry::new(key, value, clock.now(), Duration::from_secs(ttl_secs))
    }

    fn store(capacity: Capacity, policy: EvictionPolicy) -> (MemoryStore<u32>, ManualClock) {
        let clock = ManualClock::starting_now();
        (MemoryStore::new(capacity, policy, clock.shared()), clock)
    }

    fn resident(store: &MemoryStore<u32>) -> Vec<String> {
        store.keys_matching(None).unwrap()
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let (store, clock) = store(Capacity::Entries(2), EvictionPolicy::Lru);
        store.insert("k1", entry(&clock, "k1", 1, 60)).unwrap();
        store.insert("k2", entry(&clock, "k2", 2, 60)).unwrap();
        store.insert("k3", entry(&clock, "k3", 3, 60)).unwrap();

        assert_eq!(resident(&store), vec!["k2", "k3"]);
        assert_eq!(store.evictions(), 1);
    }

    #[test]
    fn test_lru_read_refreshes_recency() {
        let (store, clock) = store(Capacity::Entries(2), EvictionPolicy::Lru);
        store.insert("k1", entry(&clock, "k1", 1, 60)).unwrap();
        store.insert("k2", entry(&clock, "k2", 2, 60)).unwrap();
        assert!(store.lookup("k1").unwrap().is_some());
        store.insert("k3", entry(&clock, "k3", 3, 60)).unwrap();

        assert_eq!(resident(&store), vec!["k1", "k3"]);
    }

    #[test]
    fn test_replacing_key_at_capacity_does_not_evict() {
        let (store, clock) = store(Capacity::Entries(2), EvictionPolicy::Lru);
        store.insert("k1", entry(&clock, "k1", 1, 60)).unwrap();
        store.insert("k2", entry(&clock, "k2", 2, 60)).unwrap();
        store.insert("k1", entry(&clock, "k1", 10, 60)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.evictions(), 0);
        assert_eq!(store.lookup("k1").unwrap().unwrap().value, 10);
    }

    #[test]
    fn test_fifo_ignores_reads() {
        let (store, clock) = store(Capacity::Entries(2), EvictionPolicy::Fifo);
        store.insert("k1", entry(&clock, "k1", 1, 60)).unwrap();
        store.insert("k2", entry(&clock, "k2", 2, 60)).unwrap();
        store.lookup("k1").unwrap();
        store.insert("k3", entry(&clock, "k3", 3, 60)).unwrap();

        assert_eq!(resident(&store), vec!["k2", "k3"]);
    }

    #[test]
    fn test_lfu_evicts_least_read() {
        let (store, clock) = store(Capacity::Entries(2), EvictionPolicy::Lfu);
        store.insert("k1", entry(&clock, "k1", 1, 60)).unwrap();
        store.insert("k2", entry(&clock, "k2", 2, 60)).unwrap();
        store.lookup("k1").unwrap();
        store.lookup("k1").unwrap();
        store.lookup("k2").unwrap();
        store.insert("k3", entry(&clock, "k3", 3, 60)).unwrap();

        assert_eq!(resident(&store), vec!["k1", "k3"]);
    }

    #[test]
    fn test_lfu_ties_break_by_recency() {
        let (store, clock) = store(Capacity::Entries(2), EvictionPolicy::Lfu);
        store.insert("k1", entry(&clock, "k1", 1, 60)).unwrap();
        store.insert("k2", entry(&clock, "k2", 2, 60)).unwrap();
        store.insert("k3", entry(&clock, "k3", 3, 60)).unwrap();

        assert_eq!(resident(&store), vec!["k2", "k3"]);
    }

    #[test]
    fn test_ttl_evicts_soonest_expiring() {
        let (store, clock) = store(Capacity::Entries(2), EvictionPolicy::Ttl);
        store.insert("long", entry(&clock, "long", 1, 600)).unwrap();
        store.insert("short", entry(&clock, "short", 2, 5)).unwrap();
        store.insert("new", entry(&clock, "new", 3, 60)).unwrap();

        assert_eq!(resident(&store), vec!["long", "new"]);
    }

    #[test]
    fn test_size_evicts_largest() {
        let (store, clock) = store(Capacity::Entries(2), EvictionPolicy::Size);
        store
            .insert("big", entry(&clock, "big", 1, 60).with_size(500))
            .unwrap();
        store
            .insert("small", entry(&clock, "small", 2, 60).with_size(5))
            .unwrap();
        store
            .insert("new", entry(&clock, "new", 3, 60).with_size(50))
            .unwrap();

        assert_eq!(resident(&store), vec!["new", "small"]);
    }

    #[test]
    fn test_byte_budget_evicts_until_fit() {
        let (store, clock) = store(Capacity::Bytes(100), EvictionPolicy::Lru);
        store.insert("a", entry(&clock, "a", 1, 60).with_size(40)).unwrap();
        store.insert("b", entry(&clock, "b", 2, 60).with_size(40)).unwrap();
        assert_eq!(store.resident_bytes(), 80);

        store.insert("c", entry(&clock, "c", 3, 60).with_size(70)).unwrap();
        assert_eq!(resident(&store), vec!["c"]);
        assert_eq!(store.resident_bytes(), 70);
        assert_eq!(store.evictions(), 2);
    }

    #[test]
    fn test_oversized_entry_not_admitted() {
        let (store, clock) = store(Capacity::Bytes(100), EvictionPolicy::Lru);
        store.insert("a", entry(&clock, "a", 1, 60).with_size(10)).unwrap();
        store.insert("k", entry(&clock, "k", 1, 60).with_size(10)).unwrap();
        store.insert("k", entry(&clock, "k", 2, 60).with_size(101)).unwrap();

        // Old version is gone, neighbours untouched.
        assert!(store.lookup("k").unwrap().is_none());
        assert!(store.lookup("a").unwrap().is_some());
        assert_eq!(store.resident_bytes(), 10);
        assert_eq!(store.evictions(), 0);
    }

    #[test]
    fn test_lazy_expiry() {
        let (store, clock) = store(Capacity::Unbounded, EvictionPolicy::Lru);
        store.insert("k", entry(&clock, "k", 1, 1)).unwrap();
        assert!(store.contains("k").unwrap());
        assert_eq!(store.len(), 1);

        clock.advance(Duration::from_secs(1));
        // Still resident until looked at.
        assert_eq!(store.len(), 1);
        assert!(!store.contains("k").unwrap());
        assert_eq!(store.len(), 0);
        assert!(store.lookup("k").unwrap().is_none());
    }

    #[test]
    fn test_keys_skip_expired_and_filter() {
        let (store, clock) = store(Capacity::Unbounded, EvictionPolicy::Lru);
        store.insert("app:user:1", entry(&clock, "app:user:1", 1, 60)).unwrap();
        store.insert("app:user:2", entry(&clock, "app:user:2", 2, 1)).unwrap();
        store.insert("app:order:1", entry(&clock, "app:order:1", 3, 60)).unwrap();
        clock.advance(Duration::from_secs(2));

        let users = KeyPattern::compile("app:user:*").unwrap();
        assert_eq!(store.keys_matching(Some(&users)).unwrap(), vec!["app:user:1"]);
        assert_eq!(resident(&store), vec!["app:order:1", "app:user:1"]);
    }

    #[test]
    fn test_lookup_returns_independent_copy() {
        let clock = ManualClock::starting_now();
        let store: MemoryStore<Vec<u32>> = MemoryStore::unbounded().with_clock(clock.shared());
        store
            .insert("k", CacheEntry::new("k", vec![1, 2], clock.now(), Duration::from_secs(60)))
            .unwrap();

        let mut copy = store.lookup("k").unwrap().unwrap();
        copy.value.push(3);

        assert_eq!(store.lookup("k").unwrap().unwrap().value, vec![1, 2]);
    }

    #[test]
    fn test_lookup_records_access() {
        let (store, clock) = store(Capacity::Unbounded, EvictionPolicy::Lru);
        store.insert("k", entry(&clock, "k", 1, 60)).unwrap();
        clock.advance(Duration::from_secs(3));

        let read = store.lookup("k").unwrap().unwrap();
        assert_eq!(read.access_count, 1);
        assert_eq!(read.last_accessed, clock.now());
    }

    #[test]
    fn test_remove_where_and_purge() {
        let (store, clock) = store(Capacity::Unbounded, EvictionPolicy::Lru);
        store
            .insert("a", entry(&clock, "a", 1, 60).with_tags(["users"]))
            .unwrap();
        store.insert("b", entry(&clock, "b", 2, 60)).unwrap();

        store
            .insert("stale", entry(&clock, "stale", 9, 1).with_tags(["users"]))
            .unwrap();
        clock.advance(Duration::from_secs(1));

        let removed = store.remove_where(|e| e.has_tag("users")).unwrap();
        assert_eq!(removed, vec!["a".to_string()]);
        assert!(!store.contains("stale").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.remove("b").unwrap());

        store.insert("c", entry(&clock, "c", 3, 60).with_size(9)).unwrap();
        store.purge().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.resident_bytes(), 0);
    }

    #[tokio::test]
    async fn test_store_trait_object() {
        let clock = ManualClock::starting_now();
        let store: Arc<dyn CacheStore<u32>> =
            Arc::new(MemoryStore::unbounded().with_clock(clock.shared()));
        assert_eq!(store.name(), "memory");

        store.set("x:1", entry(&clock, "x:1", 1, 60)).await.unwrap();
        store.set("x:2", entry(&clock, "x:2", 2, 60)).await.unwrap();
        assert!(store.has("x:1").await.unwrap());
        assert_eq!(store.size().await.unwrap(), 2);
        assert_eq!(store.keys(Some("x:*")).await.unwrap().len(), 2);
        assert!(store.delete("x:1").await.unwrap());
        assert_eq!(store.get("x:2").await.unwrap().unwrap().value, 2);

        store.clear().await.unwrap();
        assert_eq!(store.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_keys_pattern() {
        let store: MemoryStore<u32> = MemoryStore::unbounded();
        let err = store.keys(Some("(")).await.unwrap_err();
        assert!(matches!(err, StrataError::Pattern(_)));
    }

    #[tokio::test]
    async fn test_poisoned_lock_fails_every_trait_call() {
        let (store, clock) = store(Capacity::Unbounded, EvictionPolicy::Lru);
        store.insert("k", entry(&clock, "k", 1, 60)).unwrap();

        // A panicking predicate runs under the lock and poisons it.
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = store.remove_where(|_| panic!("predicate failed"));
        }));
        assert!(panicked.is_err());

        let poisoned = StrataError::Store(StoreError::LockPoisoned);
        assert_eq!(store.size().await.unwrap_err(), poisoned);
        assert_eq!(store.get("k").await.unwrap_err(), poisoned);
        assert_eq!(store.keys(None).await.unwrap_err(), poisoned);
    }
}
