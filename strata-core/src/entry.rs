//! Cache entry type shared by every store tier.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{expiry_after, Timestamp};

/// A cached value plus its bookkeeping.
///
/// Entries are replaced wholesale on re-`set`; the only in-place mutation is
/// the access bookkeeping performed by [`CacheEntry::touch`]. The L1 tier
/// always holds its own copy with a shorter `expires_at`, never a shared
/// reference to the L2 entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Fully namespaced key, unique within a store.
    pub key: String,
    pub value: T,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_accessed: Timestamp,
    /// Number of reads served while resident.
    pub access_count: u64,
    /// Estimated footprint in bytes.
    pub size: u64,
    pub tags: BTreeSet<String>,
    pub tenant_id: Option<String>,
}

impl<T> CacheEntry<T> {
    /// Create an entry that expires `ttl` after `now`.
    pub fn new(key: impl Into<String>, value: T, now: Timestamp, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now,
            expires_at: expiry_after(now, ttl),
            last_accessed: now,
            access_count: 0,
            size: 0,
            tags: BTreeSet::new(),
            tenant_id: None,
        }
    }

    /// Replace the tag set.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Record the owning tenant.
    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Set the estimated size in bytes.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// True once `now` has reached `expires_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Record a read.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_accessed = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining_ttl(&self, now: Timestamp) -> Duration {
        self.expires_at
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl<T: Clone> CacheEntry<T> {
    /// Copy of this entry with a different expiry.
    ///
    /// Used when shadowing an L2 entry into L1: the copy never outlives the
    /// original, so `expires_at` is capped at the source entry's expiry.
    pub fn shadow_until(&self, expires_at: Timestamp) -> Self {
        let mut copy = self.clone();
        copy.expires_at = expires_at.min(self.expires_at);
        copy
    }
}

/// Best-effort byte footprint of a value.
///
/// Uses the JSON encoding length; values that fail to serialize report 0.
pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> u64 {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}
