//! Strata Test Utilities
//!
//! Shared test infrastructure for the Strata workspace:
//! - A recording, failure-injecting mock store
//! - Proptest generators for keys, tags, tenants, TTLs and configs
//! - Fixtures wiring a manager to a mock store on a manual clock
//! - Custom assertions for Strata error variants

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

// Re-export core types for convenience
pub use strata_core::{
    CacheConfig, CacheEntry, CachePreset, CacheStats, Clock, ConfigError, EvictionPolicy,
    ManualClock, PatternError, SharedClock, StoreError, StrataError, StrataResult, Timestamp,
};
pub use strata_storage::{
    CacheManager, CacheStore, GetOptions, MemoryStore, SetOptions, TenantCacheManager, WarmEntry,
};

// ============================================================================
// MOCK STORE
// ============================================================================

/// Operations of the [`CacheStore`] contract, for call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Delete,
    Has,
    Clear,
    Keys,
    Size,
}

impl StoreOp {
    pub const ALL: [StoreOp; 7] = [
        StoreOp::Get,
        StoreOp::Set,
        StoreOp::Delete,
        StoreOp::Has,
        StoreOp::Clear,
        StoreOp::Keys,
        StoreOp::Size,
    ];
}

/// Unbounded in-memory L2 that counts calls and can be told to fail.
///
/// While failing, every operation returns [`StoreError::Unavailable`] and
/// leaves the stored data untouched.
pub struct MockStore<V> {
    inner: MemoryStore<V>,
    calls: [AtomicUsize; 7],
    failing: AtomicBool,
}

impl<V: Clone + Send + Sync + 'static> MockStore<V> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: MemoryStore::unbounded().with_clock(clock),
            calls: Default::default(),
            failing: AtomicBool::new(false),
        }
    }

    /// Number of calls made to `op`, including failed ones.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls[op as usize].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        StoreOp::ALL.iter().map(|op| self.calls(*op)).sum()
    }

    /// Start failing every operation.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    /// Direct access to the stored entries, bypassing call accounting.
    pub fn inner(&self) -> &MemoryStore<V> {
        &self.inner
    }

    fn enter(&self, op: StoreOp) -> StrataResult<()> {
        self.calls[op as usize].fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                backend: "mock".to_string(),
                reason: format!("injected failure on {:?}", op),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheStore<V> for MockStore<V> {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get(&self, key: &str) -> StrataResult<Option<CacheEntry<V>>> {
        self.enter(StoreOp::Get)?;
        self.inner.lookup(key)
    }

    async fn set(&self, key: &str, entry: CacheEntry<V>) -> StrataResult<()> {
        self.enter(StoreOp::Set)?;
        self.inner.insert(key, entry)
    }

    async fn delete(&self, key: &str) -> StrataResult<bool> {
        self.enter(StoreOp::Delete)?;
        self.inner.remove(key)
    }

    async fn has(&self, key: &str) -> StrataResult<bool> {
        self.enter(StoreOp::Has)?;
        self.inner.contains(key)
    }

    async fn clear(&self) -> StrataResult<()> {
        self.enter(StoreOp::Clear)?;
        self.inner.purge()
    }

    async fn keys(&self, pattern: Option<&str>) -> StrataResult<Vec<String>> {
        self.enter(StoreOp::Keys)?;
        self.inner.keys(pattern).await
    }

    async fn size(&self) -> StrataResult<usize> {
        self.enter(StoreOp::Size)?;
        self.inner.size().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Strata inputs.

    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use strata_core::{CacheStrategy, SizeUnit};

    /// Caller keys such as `user:42` or `order:7:lines`.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z]{1,8}(:[a-z0-9]{1,8}){0,2}"
    }

    /// Plain tags, never in the reserved `tenant:` namespace.
    pub fn arb_tag() -> impl Strategy<Value = String> {
        "[a-z]{1,10}"
    }

    pub fn arb_tags() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_tag(), 0..4)
    }

    /// Ids accepted by tenant-scoped managers.
    pub fn arb_tenant_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{1,16}"
    }

    /// Positive TTLs between 1 ms and 1 h.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..3_600_000).prop_map(Duration::from_millis)
    }

    pub fn arb_eviction_policy() -> impl Strategy<Value = EvictionPolicy> {
        prop::sample::select(EvictionPolicy::ALL.to_vec())
    }

    pub fn arb_strategy() -> impl Strategy<Value = CacheStrategy> {
        prop::sample::select(CacheStrategy::ALL.to_vec())
    }

    pub fn arb_preset() -> impl Strategy<Value = CachePreset> {
        prop::sample::select(CachePreset::ALL.to_vec())
    }

    /// Configs that pass [`CacheConfig::validate`].
    pub fn arb_valid_config() -> impl Strategy<Value = CacheConfig> {
        (
            "[a-z]{1,12}",
            arb_strategy(),
            arb_eviction_policy(),
            1u64..100_000,
            any::<bool>(),
            1u64..86_400,
            0u64..86_400,
            any::<bool>(),
            1u64..10_000,
            any::<bool>(),
        )
            .prop_map(
                |(
                    name,
                    strategy,
                    policy,
                    max_size,
                    bytes,
                    default_secs,
                    extra_secs,
                    l1_enabled,
                    l1_max,
                    coalesce,
                )| {
                    let unit = if bytes { SizeUnit::Bytes } else { SizeUnit::Entries };
                    let config = CacheConfig::new(name)
                        .with_strategy(strategy)
                        .with_eviction_policy(policy)
                        .with_max_size(max_size, unit)
                        .with_default_ttl(Duration::from_secs(default_secs))
                        .with_max_ttl(Duration::from_secs(default_secs + extra_secs))
                        .with_coalesced_loads(coalesce);
                    if l1_enabled {
                        config.with_l1(l1_max, None)
                    } else {
                        config.without_l1()
                    }
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built managers and configs for common test scenarios.

    use super::*;
    use std::time::Duration;

    /// 60 s default TTL, 1 h max, LRU L1 of 100 entries living 5 s.
    pub fn test_config(name: &str) -> CacheConfig {
        CacheConfig::new(name)
            .with_default_ttl(Duration::from_secs(60))
            .with_max_ttl(Duration::from_secs(3_600))
            .with_l1(100, Some(Duration::from_secs(5)))
    }

    /// A manager wired to a [`MockStore`], both on one manual clock.
    pub struct Harness<V> {
        pub manager: Arc<CacheManager<V>>,
        pub store: Arc<MockStore<V>>,
        pub clock: ManualClock,
    }

    impl<V> Harness<V>
    where
        V: Clone + Serialize + Send + Sync + 'static,
    {
        /// A tenant view over this harness's manager.
        pub fn tenant(&self, tenant_id: &str) -> TenantCacheManager<V> {
            TenantCacheManager::scoped(self.manager.clone(), tenant_id)
                .unwrap_or_else(|err| panic!("tenant fixture {tenant_id}: {err}"))
        }
    }

    /// Build a [`Harness`]. Panics if `config` is invalid.
    pub fn harness<V>(config: CacheConfig) -> Harness<V>
    where
        V: Clone + Serialize + Send + Sync + 'static,
    {
        let clock = ManualClock::starting_now();
        let store = Arc::new(MockStore::new(clock.shared()));
        let manager = CacheManager::with_clock(config, store.clone(), clock.shared())
            .unwrap_or_else(|err| panic!("harness config rejected: {err}"));
        Harness {
            manager: Arc::new(manager),
            store,
            clock,
        }
    }

    /// Second manager over the same store and clock, e.g. another node.
    pub fn sibling<V>(harness: &Harness<V>, config: CacheConfig) -> Arc<CacheManager<V>>
    where
        V: Clone + Serialize + Send + Sync + 'static,
    {
        let manager =
            CacheManager::with_clock(config, harness.store.clone(), harness.clock.shared())
                .unwrap_or_else(|err| panic!("sibling config rejected: {err}"));
        Arc::new(manager)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Strata-specific results.

    use super::*;

    /// Assert that a result failed with a store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that a result failed with a config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a result failed with a pattern error.
    #[track_caller]
    pub fn assert_pattern_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Pattern(PatternError::Invalid { .. })) => {}
            other => panic!("Expected Pattern error, got: {:?}", other),
        }
    }

    /// Assert the hit/miss counters and that `hit_rate` agrees with them.
    #[track_caller]
    pub fn assert_counts(stats: &CacheStats, hits: u64, misses: u64) {
        assert_eq!(stats.hits, hits, "hits");
        assert_eq!(stats.misses, misses, "misses");
        assert!(
            (stats.hit_rate - stats.hit_rate()).abs() < 1e-9,
            "hit_rate {} disagrees with counters",
            stats.hit_rate
        );
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Route `tracing` output through the test harness.
///
/// Honors `RUST_LOG`, defaulting to `warn`. Safe to call from every test.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_mock_store_counts_and_fails() {
        let clock = ManualClock::starting_now();
        let store: MockStore<u32> = MockStore::new(clock.shared());
        let entry = CacheEntry::new("k", 1, clock.now(), std::time::Duration::from_secs(1));

        store.set("k", entry).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        assert_eq!(store.calls(StoreOp::Set), 1);
        assert_eq!(store.calls(StoreOp::Get), 1);

        store.fail();
        assertions::assert_store_error(&store.get("k").await);
        assert_eq!(store.total_calls(), 3);

        store.recover();
        assert!(store.has("k").await.unwrap());
    }

    #[test]
    fn test_harness_config_is_valid() {
        assert!(fixtures::test_config("t").validate().is_ok());
        let harness: fixtures::Harness<u32> = fixtures::harness(fixtures::test_config("t"));
        assert_eq!(harness.manager.config().name, "t");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_config_is_valid(config in generators::arb_valid_config()) {
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_generated_keys_are_namespaceable(key in generators::arb_key()) {
            prop_assert!(!key.contains('*'));
            prop_assert!(!key.is_empty());
        }
    }
}
