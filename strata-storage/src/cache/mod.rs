//! Two-tier caching.
//!
//! A [`CacheManager`] fronts a pluggable L2 [`CacheStore`] (usually a
//! shared, out-of-process store) with a bounded in-process L1
//! [`MemoryStore`]. L1 copies are short-lived shadows of L2 entries and are
//! never the source of truth: writes go to L2 first, and L1 copies expire
//! no later than the entry they shadow.
//!
//! # Tenant Isolation
//!
//! [`TenantCacheManager`] rewrites every key through [`TenantKey`], which
//! cannot be built without a validated tenant id, and tags every entry with
//! `"tenant:{id}"` so a tenant's data can be purged in one call.
//!
//! # Example
//!
//! ```ignore
//! let l2: Arc<dyn CacheStore<User>> = Arc::new(MemoryStore::unbounded());
//! let users = CacheManager::new(CachePreset::Session.config("users"), l2)?;
//!
//! let user = users
//!     .get_or_load("user:42", || fetch_user(42), SetOptions::new().with_tag("users"))
//!     .await?;
//!
//! users.invalidate_by_tag("users").await?;
//! ```

mod coalesce;
pub mod manager;
pub mod memory;
pub mod pattern;
pub mod tenant;
pub mod traits;

pub use manager::{CacheManager, GetOptions, SetOptions, WarmEntry};
pub use memory::{Capacity, MemoryStore};
pub use pattern::KeyPattern;
pub use tenant::{validate_tenant_id, TenantCacheManager, TenantKey};
pub use traits::CacheStore;
