//! Named cache configuration templates.
//!
//! Each preset fixes a tradeoff between staleness tolerance, tenant
//! isolation and process memory. What matters is the relationship between
//! fields (L1 always shorter-lived than L2, only shared reference data skips
//! isolation, large query results skip L1), not the literal numbers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CacheConfig, ConfigError};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Built-in configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePreset {
    /// Per-request session state: read constantly, fresh per node.
    Session,
    /// Rendered API payloads with moderate freshness tolerance.
    ApiResponse,
    /// Lookup tables shared by every tenant; rarely changes.
    ReferenceData,
    /// Query results; potentially large, so never promoted into L1.
    QueryResult,
}

impl CachePreset {
    pub const ALL: [CachePreset; 4] = [
        CachePreset::Session,
        CachePreset::ApiResponse,
        CachePreset::ReferenceData,
        CachePreset::QueryResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CachePreset::Session => "session",
            CachePreset::ApiResponse => "api-response",
            CachePreset::ReferenceData => "reference-data",
            CachePreset::QueryResult => "query-result",
        }
    }

    /// Materialize the preset under the given namespace.
    pub fn config(&self, name: impl Into<String>) -> CacheConfig {
        let base = CacheConfig::new(name);
        match self {
            CachePreset::Session => base
                .with_default_ttl(Duration::from_secs(30 * MINUTE))
                .with_max_ttl(Duration::from_secs(DAY))
                .with_tenant_isolation(true)
                .with_l1(500, Some(Duration::from_secs(MINUTE))),
            CachePreset::ApiResponse => base
                .with_default_ttl(Duration::from_secs(5 * MINUTE))
                .with_max_ttl(Duration::from_secs(HOUR))
                .with_tenant_isolation(true)
                .with_l1(1_000, Some(Duration::from_secs(30))),
            CachePreset::ReferenceData => base
                .with_default_ttl(Duration::from_secs(DAY))
                .with_max_ttl(Duration::from_secs(7 * DAY))
                .with_tenant_isolation(false)
                .with_l1(5_000, Some(Duration::from_secs(HOUR))),
            CachePreset::QueryResult => base
                .with_default_ttl(Duration::from_secs(MINUTE))
                .with_max_ttl(Duration::from_secs(15 * MINUTE))
                .with_tenant_isolation(true)
                .without_l1(),
        }
    }
}

impl fmt::Display for CachePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        CachePreset::ALL
            .into_iter()
            .find(|preset| preset.as_str() == normalized)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "preset".to_string(),
                value: s.to_string(),
                reason: "expected session, api-response, reference-data or query-result"
                    .to_string(),
            })
    }
}
