//! Cache entries, tier identifiers and per-tier statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cache layer, ordered fastest to slowest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Hot,
    Distributed,
    Durable,
}

impl CacheTier {
    pub fn name(&self) -> &'static str {
        match self {
            CacheTier::Hot => "hot",
            CacheTier::Distributed => "distributed",
            CacheTier::Durable => "durable",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A cached value with its lifetime and labels
///
/// An entry is live iff `now - created_at < ttl`. Copies promoted between
/// tiers keep `created_at` and `ttl`, so a promoted copy never outlives the
/// original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub tags: BTreeSet<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: Utc::now(),
            ttl,
            tags: BTreeSet::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the entry is still live at `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match age.to_std() {
            Ok(age) => age < self.ttl,
            // created_at in the future (clock skew between processes)
            Err(_) => !self.ttl.is_zero(),
        }
    }

    pub fn is_expired(&self) -> bool {
        !self.is_live_at(Utc::now())
    }

    /// Lifetime left before expiry, zero once expired
    pub fn remaining_ttl(&self) -> Duration {
        let age = Utc::now()
            .signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or_default();
        self.ttl.saturating_sub(age)
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }

    /// Rough in-memory footprint of the entry
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.key.len()
            + self.tags.iter().map(String::len).sum::<usize>()
            + self.metadata.keys().map(String::len).sum::<usize>()
    }
}

/// Statistics snapshot for one tier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub hit_rate: f64,
    pub memory_usage: usize,
}

impl CacheStats {
    pub fn hit_rate(hits: u64, misses: u64) -> f64 {
        let lookups = hits + misses;
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }
}

/// Atomic counters behind a [`CacheStats`] snapshot
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub errors: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, size: usize, memory_usage: usize) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
            hit_rate: CacheStats::hit_rate(hits, misses),
            memory_usage,
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_liveness_boundary() {
        let entry = CacheEntry::new("k", "v", Duration::from_millis(100));
        let created = entry.created_at;

        assert!(entry.is_live_at(created + chrono::Duration::milliseconds(50)));
        assert!(!entry.is_live_at(created + chrono::Duration::milliseconds(100)));
        assert!(!entry.is_live_at(created + chrono::Duration::milliseconds(150)));
    }

    #[test]
    fn test_zero_ttl_is_never_live() {
        let entry = CacheEntry::new("k", 1, Duration::ZERO);
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_tag_intersection() {
        let entry = CacheEntry::new("k", 1, Duration::from_secs(1)).with_tags(["user:42", "order"]);
        assert!(entry.has_any_tag(&["order".to_string()]));
        assert!(entry.has_any_tag(&["nope".to_string(), "user:42".to_string()]));
        assert!(!entry.has_any_tag(&["user:7".to_string()]));
        assert!(!entry.has_any_tag(&[]));
    }

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::hit_rate(0, 0), 0.0);
        assert_eq!(CacheStats::hit_rate(3, 1), 0.75);

        let counters = CacheCounters::default();
        counters.record_hit();
        counters.record_miss();
        let stats = counters.snapshot(1, 64);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.size, 1);
    }
}
