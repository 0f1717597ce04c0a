//! # Expiring Map
//!
//! Bounded key → entry store with per-entry TTL and least-recently-used
//! eviction. Backs the hot tier.
//!
//! Expiry is enforced two ways:
//!
//! - **Lazily** on every read: an expired entry is removed and reported as a
//!   miss before any value is returned, so callers never observe it.
//! - **Periodically** by [`ExpiringMap::sweep`], optionally driven by a
//!   background task started with [`ExpiringMap::start_cleanup`], so entries
//!   nobody reads again still release their memory.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::entry::{CacheCounters, CacheEntry, CacheStats, CacheTier};
use crate::events::{CacheEvent, EventPublisher, EvictionReason};

/// Called for every entry removed by expiry or capacity pressure
pub type EvictionCallback<V> = Arc<dyn Fn(&str, &V, EvictionReason) + Send + Sync>;

/// Bounded LRU map with per-entry time-to-live
pub struct ExpiringMap<V> {
    inner: Arc<MapInner<V>>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

struct MapInner<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    default_ttl: Duration,
    tier: CacheTier,
    counters: CacheCounters,
    on_evict: Option<EvictionCallback<V>>,
    events: Option<EventPublisher>,
}

impl<V> std::fmt::Debug for ExpiringMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringMap")
            .field("tier", &self.inner.tier)
            .field("len", &self.inner.entries.lock().len())
            .field("default_ttl", &self.inner.default_ttl)
            .finish()
    }
}

impl<V> ExpiringMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a map holding at most `max_size` entries (minimum 1)
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(MapInner {
                entries: Mutex::new(LruCache::new(capacity)),
                default_ttl,
                tier: CacheTier::Hot,
                counters: CacheCounters::default(),
                on_evict: None,
                events: None,
            }),
            cleanup_handle: Mutex::new(None),
        }
    }

    /// Register the eviction callback
    ///
    /// Must be called before the map is shared or its sweeper started.
    pub fn with_eviction_callback(mut self, callback: EvictionCallback<V>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.on_evict = Some(callback);
        }
        self
    }

    /// Publish hit/miss/set/deleted/evicted notifications to `events`
    pub fn with_events(mut self, events: EventPublisher, tier: CacheTier) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.events = Some(events);
            inner.tier = tier;
        }
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Value for `key` if present and live
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Full entry for `key` if present and live; marks it most recently used
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.inner.get_entry(key)
    }

    /// Entry for `key` without touching recency or statistics
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        let entries = self.inner.entries.lock();
        entries.peek(key).filter(|entry| !entry.is_expired()).cloned()
    }

    /// Store `value` under `key` for `ttl`
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.set_entry(CacheEntry::new(key, value, ttl));
    }

    /// Store `value` under `key` with the map's default TTL
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.inner.default_ttl);
    }

    /// Store a prepared entry, keeping its timestamps and tags
    pub fn set_entry(&self, entry: CacheEntry<V>) {
        self.inner.set_entry(entry);
    }

    /// Remove `key`; returns whether it was present
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.entries.lock().pop(key).is_some();
        if removed {
            self.inner.publish(CacheEvent::Deleted {
                tier: self.inner.tier,
                key: key.to_string(),
            });
        }
        removed
    }

    /// Remove every live entry matching `predicate`, returning the removed keys
    ///
    /// Expired entries are swept first and counted as expiry evictions.
    pub fn remove_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&CacheEntry<V>) -> bool,
    {
        self.inner.sweep();

        let mut entries = self.inner.entries.lock();
        let keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired() && predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            entries.pop(key);
        }
        keys
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
        debug!(tier = %self.inner.tier, "Cleared expiring map");
    }

    /// Remove every expired entry, returning how many were evicted
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Live and not-yet-swept keys, most recently used first
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.entries.lock().cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.inner.entries.lock();
        let memory_usage = entries
            .iter()
            .map(|(_, entry)| entry.estimated_size())
            .sum();
        self.inner.counters.snapshot(entries.len(), memory_usage)
    }

    /// Zero the hit/miss/eviction counters
    pub fn reset_stats(&self) {
        self.inner.counters.reset();
    }

    /// Start a background task sweeping expired entries every `interval`
    ///
    /// Replaces a previously started sweeper. The task holds a weak
    /// reference and exits once the map is dropped.
    pub fn start_cleanup(&self, interval: Duration) {
        let weak: Weak<MapInner<V>> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        let evicted = inner.sweep();
                        if evicted > 0 {
                            debug!(tier = %inner.tier, evicted, "🧹 CACHE: Periodic sweep");
                        }
                    }
                    None => break,
                }
            }
        });

        if let Some(previous) = self.cleanup_handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background sweeper, if running
    pub fn stop_cleanup(&self) {
        if let Some(handle) = self.cleanup_handle.lock().take() {
            handle.abort();
        }
    }
}

impl<V> Drop for ExpiringMap<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl<V> MapInner<V>
where
    V: Clone,
{
    fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let (found, expired) = {
            let mut entries = self.entries.lock();
            match entries.peek(key).map(CacheEntry::is_expired) {
                None => (None, None),
                Some(true) => (None, entries.pop(key)),
                Some(false) => (entries.get(key).cloned(), None),
            }
        };

        if let Some(entry) = expired {
            self.counters.record_evictions(1);
            self.notify_evicted(&entry, EvictionReason::Expired);
        }

        match found {
            Some(entry) => {
                self.counters.record_hit();
                self.publish(CacheEvent::Hit {
                    tier: self.tier,
                    key: key.to_string(),
                });
                Some(entry)
            }
            None => {
                self.counters.record_miss();
                self.publish(CacheEvent::Miss {
                    tier: Some(self.tier),
                    key: key.to_string(),
                });
                None
            }
        }
    }

    fn set_entry(&self, entry: CacheEntry<V>) {
        let key = entry.key.clone();
        let displaced = {
            let mut entries = self.entries.lock();
            if entries.contains(&key) {
                entries.put(key.clone(), entry);
                None
            } else {
                entries.push(key.clone(), entry)
            }
        };

        self.publish(CacheEvent::Set {
            tier: self.tier,
            key,
        });

        if let Some((_, evicted)) = displaced {
            self.counters.record_evictions(1);
            self.notify_evicted(&evicted, EvictionReason::Capacity);
        }
    }

    fn sweep(&self) -> usize {
        let expired: Vec<CacheEntry<V>> = {
            let mut entries = self.entries.lock();
            let now = chrono::Utc::now();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| !entry.is_live_at(now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| entries.pop(key)).collect()
        };

        self.counters.record_evictions(expired.len() as u64);
        for entry in &expired {
            self.notify_evicted(entry, EvictionReason::Expired);
        }
        expired.len()
    }

    fn notify_evicted(&self, entry: &CacheEntry<V>, reason: EvictionReason) {
        if let Some(callback) = &self.on_evict {
            callback(&entry.key, &entry.value, reason);
        }
        self.publish(CacheEvent::Evicted {
            tier: self.tier,
            key: entry.key.clone(),
            reason,
        });
    }

    fn publish(&self, event: CacheEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_set_then_get_round_trip() {
        let map = ExpiringMap::new(10, Duration::from_secs(60));
        map.set("k", "v".to_string(), Duration::from_secs(60));
        assert_eq!(map.get("k"), Some("v".to_string()));
        assert_eq!(map.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_never_returned() {
        let map = ExpiringMap::new(10, Duration::from_secs(60));
        map.set("k", "v", Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(map.get("k"), Some("v"));

        tokio::time::sleep(Duration::from_millis(130)).await;
        assert_eq!(map.get("k"), None);

        let stats = map.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let map = ExpiringMap::new(2, Duration::from_secs(60)).with_eviction_callback(Arc::new(
            move |key: &str, _value: &u32, reason| {
                sink.lock().push((key.to_string(), reason));
            },
        ));

        map.set("a", 1, Duration::from_secs(60));
        map.set("b", 2, Duration::from_secs(60));
        // Touch "a" so "b" becomes the LRU entry
        assert_eq!(map.get("a"), Some(1));
        map.set("c", 3, Duration::from_secs(60));

        assert_eq!(map.get("b"), None);
        assert_eq!(map.get("a"), Some(1));
        assert_eq!(map.get("c"), Some(3));
        assert_eq!(
            evicted.lock().as_slice(),
            &[("b".to_string(), EvictionReason::Capacity)]
        );
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let map = ExpiringMap::new(2, Duration::from_secs(60));
        map.set("a", 1, Duration::from_secs(60));
        map.set("b", 2, Duration::from_secs(60));
        map.set("a", 10, Duration::from_secs(60));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(10));
        assert_eq!(map.get("b"), Some(2));
        assert_eq!(map.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let map = ExpiringMap::new(10, Duration::from_secs(60)).with_eviction_callback(Arc::new(
            move |_key: &str, _value: &u32, reason| {
                assert_eq!(reason, EvictionReason::Expired);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        map.set("short-1", 1, Duration::from_millis(10));
        map.set("short-2", 2, Duration::from_millis(10));
        map.set("long", 3, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(map.sweep(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(map.keys(), vec!["long".to_string()]);
    }

    #[tokio::test]
    async fn test_background_cleanup_reclaims_unread_entries() {
        let map = ExpiringMap::new(10, Duration::from_secs(60));
        map.set("k", 1, Duration::from_millis(10));
        map.start_cleanup(Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(map.len(), 0);
        assert_eq!(map.stats().evictions, 1);
        map.stop_cleanup();
    }

    #[test]
    fn test_delete_and_remove_where() {
        let map = ExpiringMap::new(10, Duration::from_secs(60));
        map.set_entry(CacheEntry::new("a", 1, Duration::from_secs(60)).with_tags(["x"]));
        map.set_entry(CacheEntry::new("b", 2, Duration::from_secs(60)).with_tags(["y"]));
        map.set_entry(CacheEntry::new("c", 3, Duration::from_secs(60)).with_tags(["x", "y"]));

        assert!(map.delete("b"));
        assert!(!map.delete("b"));

        let mut removed = map.remove_where(|entry| entry.has_any_tag(&["x".to_string()]));
        removed.sort();
        assert_eq!(removed, vec!["a".to_string(), "c".to_string()]);
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_remove_where_skips_expired_entries() {
        let map = ExpiringMap::new(10, Duration::from_secs(60));
        map.set_entry(CacheEntry::new("stale", 1, Duration::from_millis(10)).with_tags(["x"]));
        map.set_entry(CacheEntry::new("fresh", 2, Duration::from_secs(60)).with_tags(["x"]));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = map.remove_where(|entry| entry.has_any_tag(&["x".to_string()]));

        assert_eq!(removed, vec!["fresh".to_string()]);
        assert!(map.is_empty());
        assert_eq!(map.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_events_published_for_tier() {
        let events = EventPublisher::new(16);
        let mut rx = events.subscribe();
        let map = ExpiringMap::new(10, Duration::from_secs(60)).with_events(events, CacheTier::Hot);

        map.set("k", 1, Duration::from_secs(60));
        map.get("k");
        map.get("missing");

        let names: Vec<&str> = (0..3)
            .map(|_| rx.try_recv().unwrap().event.name())
            .collect();
        assert_eq!(names, vec!["set", "hit", "miss"]);
    }
}
