//! Cache store trait.
//!
//! A [`CacheStore`] is the pluggable L2 tier behind a cache manager. The
//! in-process [`MemoryStore`](super::MemoryStore) implements it too, so the
//! same contract serves both tiers.

use async_trait::async_trait;
use strata_core::{CacheEntry, StrataResult};

/// Pluggable key/value store holding [`CacheEntry`] records.
///
/// # Contract
///
/// - Keys are the fully namespaced keys produced by the manager; stores do
///   not interpret them.
/// - `get` and `has` honor expiry: an expired entry is reported as absent
///   (and may be removed as a side effect).
/// - `keys` filters with a glob-like pattern where `*` matches any run of
///   characters and the whole key must match. `None` lists every live key.
/// - Failures are returned as errors; callers never see a partially applied
///   operation reported as success.
///
/// Implementations must be thread-safe; every method may be called
/// concurrently from many tasks.
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str {
        "store"
    }

    /// Fetch a live entry.
    async fn get(&self, key: &str) -> StrataResult<Option<CacheEntry<V>>>;

    /// Insert or replace an entry.
    async fn set(&self, key: &str, entry: CacheEntry<V>) -> StrataResult<()>;

    /// Remove an entry. Returns true if something was removed.
    async fn delete(&self, key: &str) -> StrataResult<bool>;

    /// Whether a live entry exists.
    async fn has(&self, key: &str) -> StrataResult<bool>;

    /// Remove every entry.
    async fn clear(&self) -> StrataResult<()>;

    /// List live keys, optionally filtered by pattern.
    async fn keys(&self, pattern: Option<&str>) -> StrataResult<Vec<String>>;

    /// Number of resident entries.
    async fn size(&self) -> StrataResult<usize>;
}
