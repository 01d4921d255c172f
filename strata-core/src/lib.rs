//! Strata Core - Cache Data Types
//!
//! Pure data structures shared by every cache tier: entries, configuration,
//! presets, statistics, errors and the clock abstraction. No I/O lives here;
//! stores and managers are in `strata-storage`.

use std::time::Duration;

use chrono::{DateTime, Utc};

pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod presets;
pub mod stats;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CacheConfig, CacheStrategy, EvictionPolicy, SizeUnit, ENV_PREFIX};
pub use entry::{estimate_size, CacheEntry};
pub use error::{ConfigError, PatternError, StoreError, StrataError, StrataResult};
pub use presets::CachePreset;
pub use stats::{hit_rate, CacheStats, TierStats};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Reserved tag prefix marking an entry's owning tenant.
pub const TENANT_TAG_PREFIX: &str = "tenant:";

/// The reserved tag carried by every entry a tenant writes: `"tenant:{id}"`.
pub fn tenant_tag(tenant_id: &str) -> String {
    format!("{}{}", TENANT_TAG_PREFIX, tenant_id)
}

/// `now + ttl`, saturating at the latest representable instant.
pub fn expiry_after(now: Timestamp, ttl: Duration) -> Timestamp {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_tag() {
        assert_eq!(tenant_tag("acme"), "tenant:acme");
    }

    #[test]
    fn test_expiry_after_saturates() {
        let now = Utc::now();
        assert_eq!(
            expiry_after(now, Duration::from_secs(2)),
            now + chrono::Duration::seconds(2)
        );
        assert_eq!(expiry_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
