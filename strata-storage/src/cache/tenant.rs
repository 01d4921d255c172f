//! Tenant-scoped caching.
//!
//! [`TenantKey`] can only be built from a validated tenant id, and
//! [`TenantCacheManager`] routes every key, tag and invalidation through
//! it, so one tenant's operations cannot read or evict another tenant's
//! entries.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use strata_core::{
    system_clock, tenant_tag, CacheConfig, CacheStats, ConfigError, SharedClock, StrataError,
    StrataResult, TENANT_TAG_PREFIX,
};

use super::{CacheManager, CacheStore, GetOptions, SetOptions, WarmEntry};

/// A cache key scoped to one tenant: `"tenant:{tenant_id}:{key}"`.
///
/// Tenant ids are restricted to ASCII letters, digits, `-` and `_`. That
/// keeps the encoding unambiguous (no `:`) and keeps tenant prefixes free
/// of pattern metacharacters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantKey {
    inner: TenantKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TenantKeyInner {
    tenant_id: String,
    key: String,
}

impl TenantKey {
    pub fn new(tenant_id: impl Into<String>, key: impl Into<String>) -> Result<Self, ConfigError> {
        let tenant_id = tenant_id.into();
        validate_tenant_id(&tenant_id)?;
        Ok(Self::trusted(tenant_id, key.into()))
    }

    fn trusted(tenant_id: String, key: String) -> Self {
        Self {
            inner: TenantKeyInner { tenant_id, key },
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.inner.tenant_id
    }

    /// The caller's key, without the tenant prefix.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn encode(&self) -> String {
        format!("{}{}", Self::tenant_prefix(&self.inner.tenant_id), self.inner.key)
    }

    /// Parse an encoded key. `None` if the prefix or tenant id is malformed.
    pub fn decode(encoded: &str) -> Option<Self> {
        let rest = encoded.strip_prefix(TENANT_TAG_PREFIX)?;
        let (tenant_id, key) = rest.split_once(':')?;
        validate_tenant_id(tenant_id).ok()?;
        Some(Self::trusted(tenant_id.to_string(), key.to_string()))
    }

    /// `"tenant:{tenant_id}:"`, the prefix shared by all of a tenant's keys.
    pub fn tenant_prefix(tenant_id: &str) -> String {
        format!("{}:", tenant_tag(tenant_id))
    }
}

/// Reject empty ids and ids outside `[A-Za-z0-9_-]`.
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), ConfigError> {
    if tenant_id.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "tenant_id".to_string(),
        });
    }
    if !tenant_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::InvalidValue {
            field: "tenant_id".to_string(),
            value: tenant_id.to_string(),
            reason: "only ASCII letters, digits, '-' and '_' are allowed".to_string(),
        });
    }
    Ok(())
}

/// A cache manager view bound to one tenant.
///
/// Every key is rewritten to `"tenant:{id}:{key}"` and every write carries
/// the reserved tag `"tenant:{id}"`. Several tenants can share one
/// underlying [`CacheManager`] (see [`TenantCacheManager::scoped`] and
/// [`TenantCacheManager::for_tenant`]); stats are then shared as well.
pub struct TenantCacheManager<V> {
    base: Arc<CacheManager<V>>,
    tenant_id: String,
    tag: String,
}

impl<V> TenantCacheManager<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    /// Build a dedicated manager for one tenant. Tenant isolation is forced on.
    pub fn new(
        config: CacheConfig,
        l2: Arc<dyn CacheStore<V>>,
        tenant_id: impl Into<String>,
    ) -> StrataResult<Self> {
        Self::with_clock(config, l2, system_clock(), tenant_id)
    }

    pub fn with_clock(
        config: CacheConfig,
        l2: Arc<dyn CacheStore<V>>,
        clock: SharedClock,
        tenant_id: impl Into<String>,
    ) -> StrataResult<Self> {
        let tenant_id = tenant_id.into();
        validate_tenant_id(&tenant_id)?;
        let base = CacheManager::with_clock(config.with_tenant_isolation(true), l2, clock)?;
        Self::scoped(Arc::new(base), tenant_id)
    }

    /// Bind an existing manager to a tenant.
    ///
    /// The manager must have been configured with tenant isolation.
    pub fn scoped(base: Arc<CacheManager<V>>, tenant_id: impl Into<String>) -> StrataResult<Self> {
        let tenant_id = tenant_id.into();
        validate_tenant_id(&tenant_id)?;
        if !base.config().tenant_isolation {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "tenant_isolation = false".to_string(),
                option_b: "tenant-scoped manager".to_string(),
            }
            .into());
        }
        let tag = tenant_tag(&tenant_id);
        Ok(Self {
            base,
            tenant_id,
            tag,
        })
    }

    /// A sibling view for another tenant over the same manager.
    pub fn for_tenant(&self, tenant_id: impl Into<String>) -> StrataResult<Self> {
        Self::scoped(self.base.clone(), tenant_id)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn base(&self) -> &Arc<CacheManager<V>> {
        &self.base
    }

    fn scoped_key(&self, key: &str) -> String {
        TenantKey::trusted(self.tenant_id.clone(), key.to_string()).encode()
    }

    fn scoped_options(&self, mut options: SetOptions) -> StrataResult<SetOptions> {
        if let Some(reserved) = options
            .tags
            .iter()
            .find(|tag| tag.starts_with(TENANT_TAG_PREFIX) && **tag != self.tag)
        {
            return Err(ConfigError::InvalidValue {
                field: "tags".to_string(),
                value: reserved.clone(),
                reason: format!("the '{}' prefix is reserved", TENANT_TAG_PREFIX),
            }
            .into());
        }
        if !options.tags.contains(&self.tag) {
            options.tags.push(self.tag.clone());
        }
        options.tenant_id = Some(self.tenant_id.clone());
        Ok(options)
    }

    pub async fn get(&self, key: &str, options: GetOptions) -> StrataResult<Option<V>> {
        self.base.get(&self.scoped_key(key), options).await
    }

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
        let options = self.scoped_options(options)?;
        self.base
            .get_or_load(&self.scoped_key(key), loader, options)
            .await
    }

    /// Store a value tagged with this tenant.
    ///
    /// Tags starting with `tenant:` other than this tenant's own are rejected.
    pub async fn set(&self, key: &str, value: V, options: SetOptions) -> StrataResult<()> {
        let options = self.scoped_options(options)?;
        self.base.set(&self.scoped_key(key), value, options).await
    }

    pub async fn delete(&self, key: &str) -> StrataResult<bool> {
        self.base.delete(&self.scoped_key(key)).await
    }

    pub async fn has(&self, key: &str) -> StrataResult<bool> {
        self.base.has(&self.scoped_key(key)).await
    }

    /// Remove this tenant's entries carrying `tag`.
    pub async fn invalidate_by_tag(&self, tag: &str) -> StrataResult<usize> {
        let own = self.tag.as_str();
        self.base
            .invalidate_where(|entry| entry.has_tag(tag) && entry.has_tag(own))
            .await
    }

    /// Remove this tenant's entries whose key matches `pattern`.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> StrataResult<usize> {
        self.base
            .invalidate_by_pattern(&self.scoped_key(pattern))
            .await
    }

    /// Remove every entry this tenant owns, across the whole L2 store.
    pub async fn invalidate_tenant(&self) -> StrataResult<usize> {
        self.base.invalidate_by_tag(&self.tag).await
    }

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
        Ok(written)
    }

    /// Stats of the underlying manager.
    pub async fn get_stats(&self) -> StrataResult<CacheStats> {
        self.base.get_stats().await
    }
}

impl<V> std::fmt::Debug for TenantCacheManager<V>
where
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCacheManager")
            .field("tenant_id", &self.tenant_id)
            .field("base", &self.base)
            .finish()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn tenant_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{1,12}"
    }

    proptest! {
        /// Property: keys of different tenants never collide, whatever the caller key.
        #[test]
        fn prop_tenants_never_collide(
            a in tenant_id(),
            b in tenant_id(),
            key_a in ".{0,24}",
            key_b in ".{0,24}",
        ) {
            prop_assume!(a != b);
            let ka = TenantKey::new(a.clone(), key_a).unwrap().encode();
            let kb = TenantKey::new(b, key_b).unwrap().encode();
            prop_assert_ne!(&ka, &kb);
            prop_assert!(ka.starts_with(&TenantKey::tenant_prefix(&a)));
        }

        /// Property: an encoded key decodes back to its tenant and key.
        #[test]
        fn prop_decode_recovers_parts(tenant in tenant_id(), key in ".{0,24}") {
            let encoded = TenantKey::new(tenant.clone(), key.clone()).unwrap().encode();
            let decoded = TenantKey::decode(&encoded).unwrap();
            prop_assert_eq!(decoded.tenant_id(), tenant.as_str());
            prop_assert_eq!(decoded.key(), key.as_str());
        }
    }
}
