//! Strata Storage - Cache Stores and Managers
//!
//! The store contract ([`CacheStore`]), the in-process [`MemoryStore`], and
//! the two-tier [`CacheManager`] / [`TenantCacheManager`] built on them.
//! Data types, configuration and errors live in `strata-core` and are
//! re-exported here for convenience.

pub mod cache;

pub use cache::{
    validate_tenant_id, CacheManager, CacheStore, Capacity, GetOptions, KeyPattern, MemoryStore,
    SetOptions, TenantCacheManager, TenantKey, WarmEntry,
};

pub use strata_core::{
    CacheConfig, CacheEntry, CachePreset, CacheStats, CacheStrategy, EvictionPolicy, SizeUnit,
    StrataError, StrataResult, TierStats,
};
