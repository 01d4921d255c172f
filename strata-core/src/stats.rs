//! Cache usage statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `hits / (hits + misses)`, or 0.0 when nothing has been looked up.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Statistics for a single tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Resident entries.
    pub size: u64,
    /// Configured capacity, in the cache's size unit.
    pub max_size: u64,
}

impl TierStats {
    pub fn new(hits: u64, misses: u64) -> Self {
        Self {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            ..Self::default()
        }
    }
}

/// Snapshot of a cache manager's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered by either tier.
    pub hits: u64,
    /// Lookups answered by neither tier.
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    /// Number of loader invocations that completed successfully.
    pub loads: u64,
    /// Mean loader latency.
    pub avg_load_time: Duration,
    /// Resident entries in the backing (L2) store.
    pub size: u64,
    /// Configured capacity, in the cache's size unit.
    pub max_size: u64,
    pub l1: Option<TierStats>,
}

impl CacheStats {
    /// Recompute `hit_rate` from the counters.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits, self.misses)
    }

    /// Total lookups recorded.
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert_eq!(stats.requests(), 100);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_tier_stats_new() {
        let tier = TierStats::new(3, 1);
        assert!((tier.hit_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(tier.evictions, 0);
    }

    #[test]
    fn test_hit_rate_zero_requests() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(0, 5), 0.0);
        assert_eq!(hit_rate(5, 0), 1.0);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: hit rate is always a valid ratio.
        #[test]
        fn prop_hit_rate_in_unit_interval(hits in 0u64..1_000_000, misses in 0u64..1_000_000) {
            let rate = hit_rate(hits, misses);
            prop_assert!((0.0..=1.0).contains(&rate));
            if hits + misses > 0 {
                prop_assert!((rate - hits as f64 / (hits + misses) as f64).abs() < 1e-12);
            }
        }
    }
}
