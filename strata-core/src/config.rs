//! Cache configuration types

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Environment variable prefix read by [`CacheConfig::from_env`].
pub const ENV_PREFIX: &str = "STRATA_CACHE_";

/// Caching strategy label.
///
/// Informational: routing is the caller's job, except that
/// `get_or_load` always behaves as cache-aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    #[default]
    CacheAside,
    ReadThrough,
    WriteThrough,
    WriteBehind,
    RefreshAhead,
}

/// Victim selection policy for the bounded L1 tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Least recently touched key.
    #[default]
    Lru,
    /// Fewest reads, ties broken by recency.
    Lfu,
    /// Oldest insertion.
    Fifo,
    /// Earliest expiry.
    Ttl,
    /// Largest estimated size.
    Size,
}

/// Unit for `max_size` / `l1_max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeUnit {
    #[default]
    Entries,
    Bytes,
}

macro_rules! kebab_enum {
    ($ty:ident, $field:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Canonical kebab-case name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
                match normalized.as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(ConfigError::InvalidValue {
                        field: $field.to_string(),
                        value: s.to_string(),
                        reason: format!(
                            "expected one of: {}",
                            [$($name),+].join(", ")
                        ),
                    }),
                }
            }
        }
    };
}

kebab_enum!(CacheStrategy, "strategy", {
    CacheAside => "cache-aside",
    ReadThrough => "read-through",
    WriteThrough => "write-through",
    WriteBehind => "write-behind",
    RefreshAhead => "refresh-ahead",
});

kebab_enum!(EvictionPolicy, "eviction_policy", {
    Lru => "lru",
    Lfu => "lfu",
    Fifo => "fifo",
    Ttl => "ttl",
    Size => "size",
});

kebab_enum!(SizeUnit, "max_size_unit", {
    Entries => "entries",
    Bytes => "bytes",
});

/// Configuration for a two-tier cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prefix for every key this cache writes.
    pub name: String,
    pub strategy: CacheStrategy,
    pub eviction_policy: EvictionPolicy,
    /// Overall capacity, in `max_size_unit`. Reported in stats; the L2 store
    /// enforces its own limits.
    pub max_size: u64,
    pub max_size_unit: SizeUnit,
    /// TTL used when a caller does not pass one.
    pub default_ttl: Duration,
    /// Hard ceiling; requested TTLs are clamped to it.
    pub max_ttl: Duration,
    pub tenant_isolation: bool,
    pub l1_enabled: bool,
    /// L1 capacity, in `max_size_unit`.
    pub l1_max_size: u64,
    /// L1 shadow lifetime. `None` means a tenth of `default_ttl`.
    pub l1_ttl: Option<Duration>,
    /// Serialize concurrent `get_or_load` calls for the same cold key.
    #[serde(default)]
    pub coalesce_loads: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            strategy: CacheStrategy::CacheAside,
            eviction_policy: EvictionPolicy::Lru,
            max_size: 10_000,
            max_size_unit: SizeUnit::Entries,
            default_ttl: Duration::from_secs(3600), // 1 hour
            max_ttl: Duration::from_secs(86_400),   // 24 hours
            tenant_isolation: false,
            l1_enabled: true,
            l1_max_size: 1_000,
            l1_ttl: None,
            coalesce_loads: false,
        }
    }
}

impl CacheConfig {
    /// Create a config with default values under the given namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Set the overall capacity and its unit.
    pub fn with_max_size(mut self, max_size: u64, unit: SizeUnit) -> Self {
        self.max_size = max_size;
        self.max_size_unit = unit;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    pub fn with_tenant_isolation(mut self, enabled: bool) -> Self {
        self.tenant_isolation = enabled;
        self
    }

    /// Enable L1 with the given capacity and optional shadow TTL.
    pub fn with_l1(mut self, max_size: u64, ttl: Option<Duration>) -> Self {
        self.l1_enabled = true;
        self.l1_max_size = max_size;
        self.l1_ttl = ttl;
        self
    }

    pub fn without_l1(mut self) -> Self {
        self.l1_enabled = false;
        self
    }

    pub fn with_coalesced_loads(mut self, enabled: bool) -> Self {
        self.coalesce_loads = enabled;
        self
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "name".to_string(),
            });
        }
        if self.name.contains('*') {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                value: self.name.clone(),
                reason: "must not contain the '*' wildcard".to_string(),
            });
        }
        if self.max_size == 0 {
            return Err(invalid("max_size", "0", "must be positive"));
        }
        if self.default_ttl.is_zero() {
            return Err(invalid("default_ttl", "0s", "must be positive"));
        }
        if self.max_ttl < self.default_ttl {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("max_ttl={:?}", self.max_ttl),
                option_b: format!("default_ttl={:?}", self.default_ttl),
            });
        }
        if self.l1_enabled && self.l1_max_size == 0 {
            return Err(invalid("l1_max_size", "0", "must be positive when L1 is enabled"));
        }
        if let Some(l1_ttl) = self.l1_ttl {
            if l1_ttl.is_zero() {
                return Err(invalid("l1_ttl", "0s", "must be positive"));
            }
            if l1_ttl > self.max_ttl {
                return Err(ConfigError::IncompatibleOptions {
                    option_a: format!("l1_ttl={:?}", l1_ttl),
                    option_b: format!("max_ttl={:?}", self.max_ttl),
                });
            }
        }
        Ok(())
    }

    /// Effective TTL for a write: the requested (or default) TTL capped at `max_ttl`.
    pub fn clamp_ttl(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default_ttl).min(self.max_ttl)
    }

    /// Lifetime of an L1 shadow copy.
    pub fn l1_ttl_or_default(&self) -> Duration {
        self.l1_ttl
            .unwrap_or(self.default_ttl / 10)
            .min(self.max_ttl)
    }

    /// `"{name}:{key}"`.
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{}", self.name, key)
    }

    /// Build a config from `STRATA_CACHE_*` environment variables.
    ///
    /// Environment variables (all optional, defaults from [`CacheConfig::default`]):
    /// - `STRATA_CACHE_STRATEGY`: cache-aside | read-through | write-through | write-behind | refresh-ahead
    /// - `STRATA_CACHE_EVICTION_POLICY`: lru | lfu | fifo | ttl | size
    /// - `STRATA_CACHE_MAX_SIZE`, `STRATA_CACHE_MAX_SIZE_UNIT` (entries | bytes)
    /// - `STRATA_CACHE_DEFAULT_TTL_SECS`, `STRATA_CACHE_MAX_TTL_SECS`
    /// - `STRATA_CACHE_TENANT_ISOLATION`, `STRATA_CACHE_L1_ENABLED`: true | false
    /// - `STRATA_CACHE_L1_MAX_SIZE`, `STRATA_CACHE_L1_TTL_SECS`
    /// - `STRATA_CACHE_COALESCE_LOADS`: true | false
    pub fn from_env(name: impl Into<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(name, |var| std::env::var(var).ok())
    }

    /// Same as [`CacheConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(name: impl Into<String>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let key = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&key).map(|value| (key, value))
        };

        let mut config = Self::new(name);

        if let Some((_, value)) = var("STRATEGY") {
            config.strategy = value.parse()?;
        }
        if let Some((_, value)) = var("EVICTION_POLICY") {
            config.eviction_policy = value.parse()?;
        }
        if let Some((key, value)) = var("MAX_SIZE") {
            config.max_size = parse_number(&key, &value)?;
        }
        if let Some((_, value)) = var("MAX_SIZE_UNIT") {
            config.max_size_unit = value.parse()?;
        }
        if let Some((key, value)) = var("DEFAULT_TTL_SECS") {
            config.default_ttl = Duration::from_secs(parse_number(&key, &value)?);
        }
        if let Some((key, value)) = var("MAX_TTL_SECS") {
            config.max_ttl = Duration::from_secs(parse_number(&key, &value)?);
        }
        if let Some((key, value)) = var("TENANT_ISOLATION") {
            config.tenant_isolation = parse_bool(&key, &value)?;
        }
        if let Some((key, value)) = var("L1_ENABLED") {
            config.l1_enabled = parse_bool(&key, &value)?;
        }
        if let Some((key, value)) = var("L1_MAX_SIZE") {
            config.l1_max_size = parse_number(&key, &value)?;
        }
        if let Some((key, value)) = var("L1_TTL_SECS") {
            config.l1_ttl = Some(Duration::from_secs(parse_number(&key, &value)?));
        }
        if let Some((key, value)) = var("COALESCE_LOADS") {
            config.coalesce_loads = parse_bool(&key, &value)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, value, "expected a non-negative integer"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}
