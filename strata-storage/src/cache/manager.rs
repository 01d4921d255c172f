//! Two-tier cache manager.
//!
//! Reads consult the in-process L1 first, then the shared L2 store, and
//! promote L2 hits into L1 with a shorter lifetime. Writes go to L2 first,
//! then L1, so a failed L2 write never leaves a value visible only in this
//! process.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use strata_core::{
    estimate_size, expiry_after, hit_rate, system_clock, CacheConfig, CacheEntry, CacheStats,
    SharedClock, SizeUnit, StrataError, StrataResult, TierStats, Timestamp,
};
use tracing::{debug, trace, warn};

use super::coalesce::InFlightLoads;
use super::{Capacity, CacheStore, KeyPattern, MemoryStore};

/// Per-call read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Read straight from L2 and do not promote the result into L1.
    pub skip_l1: bool,
}

impl GetOptions {
    pub fn bypass_l1() -> Self {
        Self { skip_l1: true }
    }
}

/// Per-call write options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Requested lifetime; the configured default when `None`. Always capped
    /// at the configured maximum.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    /// Write only to L2. Any existing L1 copy of the key is dropped.
    pub skip_l1: bool,
    pub tenant_id: Option<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn bypass_l1(mut self) -> Self {
        self.skip_l1 = true;
        self
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// One entry for [`CacheManager::warm`].
#[derive(Debug, Clone, PartialEq)]
pub struct WarmEntry<V> {
    pub key: String,
    pub value: V,
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl<V> WarmEntry<V> {
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
            tags: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    loads: AtomicU64,
    load_nanos: AtomicU64,
    /// L1 eviction count at the last reset.
    evictions_base: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_load(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.load_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn avg_load_time(&self) -> Duration {
        match self.loads.load(Ordering::Relaxed) {
            0 => Duration::ZERO,
            loads => Duration::from_nanos(self.load_nanos.load(Ordering::Relaxed) / loads),
        }
    }

    fn reset(&self, evictions: u64) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.l1_hits,
            &self.l1_misses,
            &self.loads,
            &self.load_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.evictions_base.store(evictions, Ordering::Relaxed);
    }
}

/// Two-tier cache over a pluggable L2 [`CacheStore`].
///
/// All caller keys are namespaced as `"{name}:{key}"` before they reach
/// either tier. The manager is `Send + Sync`; share it behind an `Arc`.
///
/// # Concurrency
///
/// Two concurrent `get_or_load` misses for the same key may both run the
/// loader (last write wins) unless the config enables `coalesce_loads`, in
/// which case later callers wait for the in-flight load and reuse its
/// result.
pub struct CacheManager<V> {
    config: CacheConfig,
    l1: Option<MemoryStore<V>>,
    l2: Arc<dyn CacheStore<V>>,
    clock: SharedClock,
    counters: Counters,
    in_flight: InFlightLoads,
}

impl<V> CacheManager<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    /// Build a manager on the system clock. Fails if the config is invalid.
    pub fn new(config: CacheConfig, l2: Arc<dyn CacheStore<V>>) -> StrataResult<Self> {
        Self::with_clock(config, l2, system_clock())
    }

    /// Build a manager whose expiry decisions use `clock`.
    pub fn with_clock(
        config: CacheConfig,
        l2: Arc<dyn CacheStore<V>>,
        clock: SharedClock,
    ) -> StrataResult<Self> {
        config.validate()?;

        let l1 = config.l1_enabled.then(|| {
            let capacity = match config.max_size_unit {
                SizeUnit::Entries => {
                    Capacity::Entries(usize::try_from(config.l1_max_size).unwrap_or(usize::MAX))
                }
                SizeUnit::Bytes => Capacity::Bytes(config.l1_max_size),
            };
            MemoryStore::new(capacity, config.eviction_policy, clock.clone())
        });

        debug!(
            cache = %config.name,
            store = l2.name(),
            l1 = config.l1_enabled,
            strategy = %config.strategy,
            "Cache manager created"
        );

        Ok(Self {
            config,
            l1,
            l2,
            clock,
            counters: Counters::default(),
            in_flight: InFlightLoads::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The shared L2 store.
    pub fn store(&self) -> &Arc<dyn CacheStore<V>> {
        &self.l2
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Entries resident in L1, or 0 when L1 is disabled.
    pub fn l1_size(&self) -> usize {
        self.l1.as_ref().map_or(0, MemoryStore::len)
    }

    /// Look up a value.
    pub async fn get(&self, key: &str, options: GetOptions) -> StrataResult<Option<V>> {
        let full_key = self.config.namespaced_key(key);
        self.lookup(&full_key, options.skip_l1, true).await
    }

    /// Return the cached value, or run `loader`, cache its result and return it.
    ///
    /// A loader error is returned unchanged and nothing is cached. Cache
    /// failures convert into the loader's error type.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        options: SetOptions,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<StrataError>,
    {
        let full_key = self.config.namespaced_key(key);
        if let Some(value) = self.lookup(&full_key, options.skip_l1, true).await? {
            return Ok(value);
        }

        if !self.config.coalesce_loads {
            return self.load(key, loader, options).await;
        }

        let _permit = self.in_flight.acquire(&full_key).await;
        if let Some(value) = self.lookup(&full_key, options.skip_l1, false).await? {
            trace!(key = %full_key, "Load coalesced");
            return Ok(value);
        }
        self.load(key, loader, options).await
    }

    /// Store a value in L2, then shadow it into L1.
    pub async fn set(&self, key: &str, value: V, options: SetOptions) -> StrataResult<()> {
        let full_key = self.config.namespaced_key(key);
        let now = self.clock.now();
        let ttl = self.config.clamp_ttl(options.ttl);
        let size = estimate_size(&value);

        let entry = CacheEntry::new(full_key.as_str(), value, now, ttl)
            .with_tags(options.tags)
            .with_tenant(options.tenant_id)
            .with_size(size);
        let shadow = (self.l1.is_some() && !options.skip_l1)
            .then(|| entry.shadow_until(self.l1_expiry(now)));

        self.l2
            .set(&full_key, entry)
            .await
            .map_err(self.l2_failure("set", &full_key))?;

        if let Some(l1) = &self.l1 {
            match shadow {
                Some(shadow) => l1.insert(&full_key, shadow)?,
                None => {
                    l1.remove(&full_key)?;
                }
            }
        }
        trace!(key = %full_key, ttl_ms = ttl.as_millis() as u64, "Cached");
        Ok(())
    }

    /// Remove a key from L1, then L2. Returns whether L2 held it.
    pub async fn delete(&self, key: &str) -> StrataResult<bool> {
        let full_key = self.config.namespaced_key(key);
        if let Some(l1) = &self.l1 {
            l1.remove(&full_key)?;
        }
        self.l2
            .delete(&full_key)
            .await
            .map_err(self.l2_failure("delete", &full_key))
    }

    /// Whether a live value exists in either tier. Does not touch stats.
    pub async fn has(&self, key: &str) -> StrataResult<bool> {
        let full_key = self.config.namespaced_key(key);
        if let Some(l1) = &self.l1 {
            if l1.contains(&full_key)? {
                return Ok(true);
            }
        }
        self.l2
            .has(&full_key)
            .await
            .map_err(self.l2_failure("has", &full_key))
    }

    /// Remove every entry carrying `tag` from both tiers.
    ///
    /// Scans every key in the L2 store, not only this manager's namespace.
    /// Returns the number of distinct keys removed.
    pub async fn invalidate_by_tag(&self, tag: &str) -> StrataResult<usize> {
        let removed = self.invalidate_where(|entry| entry.has_tag(tag)).await?;
        debug!(cache = %self.config.name, tag, removed, "Invalidated by tag");
        Ok(removed)
    }

    /// Remove every entry whose caller key matches `pattern`.
    ///
    /// The pattern is namespaced like a key, so `user:*` only reaches this
    /// cache's `user:` keys.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> StrataResult<usize> {
        let full_pattern = self.config.namespaced_key(pattern);
        let compiled = KeyPattern::compile(&full_pattern)?;

        let mut removed = HashSet::new();
        if let Some(l1) = &self.l1 {
            for key in l1.keys_matching(Some(&compiled))? {
                l1.remove(&key)?;
                removed.insert(key);
            }
        }
        let keys = self
            .l2
            .keys(Some(&full_pattern))
            .await
            .map_err(self.l2_failure("keys", &full_pattern))?;
        for key in keys {
            if self.purge_key(&key).await? {
                removed.insert(key);
            }
        }

        debug!(cache = %self.config.name, pattern = %full_pattern, removed = removed.len(), "Invalidated by pattern");
        Ok(removed.len())
    }

    /// Remove every entry, across both tiers, for which `predicate` holds.
    pub(crate) async fn invalidate_where<F>(&self, predicate: F) -> StrataResult<usize>
    where
        F: Fn(&CacheEntry<V>) -> bool + Send + Sync,
    {
        let mut removed: HashSet<String> = HashSet::new();
        if let Some(l1) = &self.l1 {
            removed.extend(l1.remove_where(&predicate)?);
        }

        let keys = self
            .l2
            .keys(None)
            .await
            .map_err(self.l2_failure("keys", "*"))?;
        for key in keys {
            let Some(entry) = self
                .l2
                .get(&key)
                .await
                .map_err(self.l2_failure("get", &key))?
            else {
                continue;
            };
            if !predicate(&entry) {
                continue;
            }
            if self.purge_key(&key).await? {
                removed.insert(key);
            }
        }
        Ok(removed.len())
    }

    /// Delete from L2, then drop the L1 copy a concurrent read may have
    /// promoted since the up-front L1 sweep. Returns the L2 result.
    async fn purge_key(&self, full_key: &str) -> StrataResult<bool> {
        let removed = self
            .l2
            .delete(full_key)
            .await
            .map_err(self.l2_failure("delete", full_key))?;
        if let Some(l1) = &self.l1 {
            l1.remove(full_key)?;
        }
        Ok(removed)
    }

    /// Empty L1, then the whole L2 store.
    pub async fn clear(&self) -> StrataResult<()> {
        if let Some(l1) = &self.l1 {
            l1.purge()?;
        }
        self.l2
            .clear()
            .await
            .map_err(self.l2_failure("clear", "*"))?;
        debug!(cache = %self.config.name, "Cleared");
        Ok(())
    }

    /// Snapshot of the counters plus live tier sizes.
    pub async fn get_stats(&self) -> StrataResult<CacheStats> {
        let size = self
            .l2
            .size()
            .await
            .map_err(self.l2_failure("size", "*"))?;

        let c = &self.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let evictions = self.l1_evictions();

        let l1 = self.l1.as_ref().map(|l1| {
            let mut tier = TierStats::new(
                c.l1_hits.load(Ordering::Relaxed),
                c.l1_misses.load(Ordering::Relaxed),
            );
            tier.evictions = evictions;
            tier.size = l1.len() as u64;
            tier.max_size = self.config.l1_max_size;
            tier
        });

        Ok(CacheStats {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            evictions,
            loads: c.loads.load(Ordering::Relaxed),
            avg_load_time: c.avg_load_time(),
            size: size as u64,
            max_size: self.config.max_size,
            l1,
        })
    }

    /// Zero every counter. Cached data is untouched.
    pub fn reset_stats(&self) {
        let total = self.l1.as_ref().map_or(0, MemoryStore::evictions);
        self.counters.reset(total);
    }

    /// Pre-populate the cache. Stops at the first failure.
    ///
    /// Returns the number of entries written.
    pub async fn warm(&self, entries: Vec<WarmEntry<V>>) -> StrataResult<usize> {
        let mut written = 0;
        for entry in entries {
            let options = SetOptions {
                ttl: entry.ttl,
                tags: entry.tags,
                ..SetOptions::default()
            };
            self.set(&entry.key, entry.value, options).await?;
            written += 1;
        }
        debug!(cache = %self.config.name, written, "Warmed");
        Ok(written)
    }

    async fn lookup(&self, full_key: &str, skip_l1: bool, record: bool) -> StrataResult<Option<V>> {
        let l1 = if skip_l1 { None } else { self.l1.as_ref() };

        if let Some(l1) = l1 {
            if let Some(entry) = l1.lookup(full_key)? {
                if record {
                    Counters::bump(&self.counters.l1_hits);
                    Counters::bump(&self.counters.hits);
                }
                trace!(key = %full_key, "L1 hit");
                return Ok(Some(entry.value));
            }
            if record {
                Counters::bump(&self.counters.l1_misses);
            }
        }

        let found = self
            .l2
            .get(full_key)
            .await
            .map_err(self.l2_failure("get", full_key))?;

        match found {
            Some(entry) => {
                if let Some(l1) = l1 {
                    l1.insert(full_key, entry.shadow_until(self.l1_expiry(self.clock.now())))?;
                }
                if record {
                    Counters::bump(&self.counters.hits);
                }
                trace!(key = %full_key, "L2 hit");
                Ok(Some(entry.value))
            }
            None => {
                if record {
                    Counters::bump(&self.counters.misses);
                }
                trace!(key = %full_key, "Miss");
                Ok(None)
            }
        }
    }

    async fn load<F, Fut, E>(&self, key: &str, loader: F, options: SetOptions) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<StrataError>,
    {
        let started = Instant::now();
        let value = loader().await?;
        self.counters.record_load(started.elapsed());

        self.set(key, value.clone(), options).await?;
        Ok(value)
    }

    fn l1_expiry(&self, now: Timestamp) -> Timestamp {
        expiry_after(now, self.config.l1_ttl_or_default())
    }

    fn l1_evictions(&self) -> u64 {
        let total = self.l1.as_ref().map_or(0, MemoryStore::evictions);
        total.saturating_sub(self.counters.evictions_base.load(Ordering::Relaxed))
    }

    fn l2_failure<'a>(
        &'a self,
        operation: &'static str,
        key: &'a str,
    ) -> impl FnOnce(StrataError) -> StrataError + 'a {
        move |err| {
            warn!(
                cache = %self.config.name,
                store = self.l2.name(),
                operation,
                key,
                error = %err,
                "L2 operation failed"
            );
            err
        }
    }
}

impl<V> fmt::Debug for CacheManager<V>
where
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("name", &self.config.name)
            .field("store", &self.l2.name())
            .field("l1", &self.l1.is_some())
            .finish()
    }
}
