//! # Tiered Cache
//!
//! Read-through cache over three tiers, fastest first:
//!
//! 1. **Hot**: an in-process [`ExpiringMap`], authoritative for this process
//! 2. **Distributed**: nodes chosen by a [`ConsistentHashRing`], reached through
//!    a [`RemoteCacheTransport`]
//! 3. **Durable**: a [`DurableStore`]
//!
//! A lower-tier hit is promoted into every faster tier. Promoted copies keep
//! the original `created_at` and `ttl`, so they expire together with the
//! entry they were copied from.
//!
//! Writes land in the hot tier before `set` returns; the distributed and
//! durable writes run concurrently and their failures are logged and
//! published, never returned. Backend failures on reads degrade to a miss for
//! that tier. Tag invalidation scans each tier independently and is not
//! transactional across tiers.

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backends::{
    CacheBackendError, DurableStore, NoopDurableStore, NoopRemoteTransport, RemoteCacheTransport,
    TierProbe,
};
use super::entry::{CacheCounters, CacheEntry, CacheStats, CacheTier};
use super::expiring_map::ExpiringMap;
use super::hash_ring::ConsistentHashRing;
use crate::config::EngineConfig;
use crate::events::{CacheEvent, EventPublisher};
use crate::logging::log_cache_operation;

/// Per-tier statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TieredCacheStats {
    pub hot: CacheStats,
    /// Lookups this process made against the distributed tier
    pub distributed: CacheStats,
    /// Lookups this process made against the durable tier
    pub durable: CacheStats,
    pub distributed_enabled: bool,
    pub durable_enabled: bool,
    pub ring_nodes: usize,
}

pub struct TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    hot: ExpiringMap<V>,
    ring: RwLock<ConsistentHashRing>,
    remote: Arc<dyn RemoteCacheTransport<V>>,
    durable: Arc<dyn DurableStore<V>>,
    distributed_configured: bool,
    durable_configured: bool,
    default_ttl: Duration,
    cleanup_interval: Duration,
    distributed_counters: CacheCounters,
    durable_counters: CacheCounters,
    events: EventPublisher,
}

impl<V> std::fmt::Debug for TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("hot", &self.hot)
            .field("distributed_enabled", &self.distributed_enabled())
            .field("durable_enabled", &self.durable_enabled())
            .field("ring_nodes", &self.ring.read().len())
            .finish()
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build the cache from configuration with no-op lower tiers
    ///
    /// Attach real backends with [`with_remote_transport`](Self::with_remote_transport)
    /// and [`with_durable_store`](Self::with_durable_store).
    pub fn new(config: &EngineConfig, events: EventPublisher) -> Self {
        let hot = ExpiringMap::new(config.hot_cache.max_size, config.hot_cache.default_ttl())
            .with_events(events.clone(), CacheTier::Hot);

        let ring = ConsistentHashRing::with_nodes(
            config.distributed_cache.virtual_nodes_per_node,
            config.distributed_cache.nodes.iter().cloned(),
        )
        .with_events(events.clone());

        info!(
            hot_max_size = config.hot_cache.max_size,
            distributed = config.distributed_cache.enabled,
            ring_nodes = ring.len(),
            durable = config.durable_cache.enabled,
            "🗄️ CACHE: Tiered cache initialized"
        );

        Self {
            hot,
            ring: RwLock::new(ring),
            remote: Arc::new(NoopRemoteTransport),
            durable: Arc::new(NoopDurableStore),
            distributed_configured: config.distributed_cache.enabled,
            durable_configured: config.durable_cache.enabled,
            default_ttl: config.hot_cache.default_ttl(),
            cleanup_interval: config.hot_cache.cleanup_interval(),
            distributed_counters: CacheCounters::default(),
            durable_counters: CacheCounters::default(),
            events,
        }
    }

    pub fn with_remote_transport(mut self, transport: Arc<dyn RemoteCacheTransport<V>>) -> Self {
        self.remote = transport;
        self
    }

    pub fn with_durable_store(mut self, store: Arc<dyn DurableStore<V>>) -> Self {
        self.durable = store;
        self
    }

    /// Enabled by configuration and served by a real transport
    pub fn distributed_enabled(&self) -> bool {
        self.distributed_configured && self.remote.is_enabled()
    }

    pub fn durable_enabled(&self) -> bool {
        self.durable_configured && self.durable.is_enabled()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Value for `key` from the fastest tier holding a live copy
    pub async fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).await.map(|entry| entry.value)
    }

    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        if let Some(entry) = self.hot.get_entry(key) {
            return Some(entry);
        }

        if let TierProbe::Hit(entry) = self.probe_distributed(key).await {
            self.hot.set_entry(entry.clone());
            log_cache_operation("promote", Some("hot"), Some(key), "promoted", Some("from distributed"));
            return Some(entry);
        }

        if let TierProbe::Hit(entry) = self.probe_durable(key).await {
            self.hot.set_entry(entry.clone());
            self.write_distributed(entry.clone()).await;
            log_cache_operation(
                "promote",
                Some("hot,distributed"),
                Some(key),
                "promoted",
                Some("from durable"),
            );
            return Some(entry);
        }

        self.events.publish(CacheEvent::Miss {
            tier: None,
            key: key.to_string(),
        });
        None
    }

    /// Probe the distributed tier only
    pub async fn probe_distributed(&self, key: &str) -> TierProbe<V> {
        if !self.distributed_enabled() {
            return TierProbe::Disabled;
        }
        let Some(node) = self.route(key) else {
            return TierProbe::Disabled;
        };

        match self.remote.get(&node, key).await {
            Ok(Some(entry)) if !entry.is_expired() => {
                self.distributed_counters.record_hit();
                self.publish_hit(CacheTier::Distributed, key);
                TierProbe::Hit(entry)
            }
            Ok(_) => {
                self.distributed_counters.record_miss();
                self.publish_miss(CacheTier::Distributed, key);
                TierProbe::Miss
            }
            Err(error) => {
                self.distributed_counters.record_miss();
                self.backend_failed(CacheTier::Distributed, "get", &error);
                TierProbe::Failed(error)
            }
        }
    }

    /// Probe the durable tier only
    pub async fn probe_durable(&self, key: &str) -> TierProbe<V> {
        if !self.durable_enabled() {
            return TierProbe::Disabled;
        }

        match self.durable.get(key).await {
            Ok(Some(entry)) if !entry.is_expired() => {
                self.durable_counters.record_hit();
                self.publish_hit(CacheTier::Durable, key);
                TierProbe::Hit(entry)
            }
            Ok(_) => {
                self.durable_counters.record_miss();
                self.publish_miss(CacheTier::Durable, key);
                TierProbe::Miss
            }
            Err(error) => {
                self.durable_counters.record_miss();
                self.backend_failed(CacheTier::Durable, "get", &error);
                TierProbe::Failed(error)
            }
        }
    }

    /// Store `value` in every enabled tier
    ///
    /// `ttl` defaults to the hot tier's default TTL. The hot tier holds the
    /// value when this returns; lower-tier failures are absorbed.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>, tags: &[String]) {
        let entry = CacheEntry::new(key, value, ttl.unwrap_or(self.default_ttl))
            .with_tags(tags.iter().cloned());
        self.set_entry(entry).await;
    }

    pub async fn set_entry(&self, entry: CacheEntry<V>) {
        self.hot.set_entry(entry.clone());
        tokio::join!(
            self.write_distributed(entry.clone()),
            self.write_durable(entry)
        );
    }

    /// Remove `key` from every enabled tier; true if any tier held it
    pub async fn delete(&self, key: &str) -> bool {
        let hot = self.hot.delete(key);
        let (distributed, durable) = tokio::join!(self.delete_distributed(key), self.delete_durable(key));
        hot || distributed || durable
    }

    /// Remove every entry tagged with any of `tags`
    ///
    /// Returns the sorted, deduplicated union of keys removed across tiers.
    /// A tier whose backend fails is skipped.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> Vec<String> {
        if tags.is_empty() {
            return Vec::new();
        }

        let mut removed: BTreeSet<String> = self
            .hot
            .remove_where(|entry| entry.has_any_tag(tags))
            .into_iter()
            .collect();

        let (distributed, durable) = tokio::join!(
            self.invalidate_distributed(tags),
            self.invalidate_durable(tags)
        );
        removed.extend(distributed);
        removed.extend(durable);

        let keys: Vec<String> = removed.into_iter().collect();
        info!(
            tags = ?tags,
            removed = keys.len(),
            "🗄️ CACHE: Invalidated entries by tag"
        );
        self.events.publish(CacheEvent::Invalidated {
            tags: tags.to_vec(),
            keys: keys.clone(),
        });
        keys
    }

    /// Remove every entry from every enabled tier
    pub async fn clear(&self) {
        self.hot.clear();

        let nodes = self.active_nodes();
        let distributed = async {
            let results = join_all(nodes.iter().map(|node| self.remote.clear(node))).await;
            for error in results.into_iter().filter_map(Result::err) {
                self.backend_failed(CacheTier::Distributed, "clear", &error);
            }
        };
        let durable = async {
            if self.durable_enabled() {
                if let Err(error) = self.durable.clear().await {
                    self.backend_failed(CacheTier::Durable, "clear", &error);
                }
            }
        };
        tokio::join!(distributed, durable);

        info!("🗄️ CACHE: Cleared all tiers");
    }

    /// Sweep expired entries out of the hot tier
    pub fn sweep_expired(&self) -> usize {
        self.hot.sweep()
    }

    /// Start the periodic hot-tier sweeper using the configured interval
    pub fn start_cleanup(&self) {
        self.hot.start_cleanup(self.cleanup_interval);
        debug!(interval_ms = self.cleanup_interval.as_millis() as u64, "Hot tier sweeper started");
    }

    pub fn stop_cleanup(&self) {
        self.hot.stop_cleanup();
    }

    /// Release this process's cache state
    ///
    /// Stops the sweeper and empties the hot tier. The distributed and durable
    /// tiers are shared with other engine instances and are left untouched.
    pub fn destroy(&self) {
        self.hot.stop_cleanup();
        self.hot.clear();
        info!("🗄️ CACHE: Tiered cache destroyed");
    }

    pub fn add_node(&self, node: impl Into<String>) -> bool {
        self.ring.write().add_node(node)
    }

    pub fn remove_node(&self, node: &str) -> bool {
        self.ring.write().remove_node(node)
    }

    pub fn nodes(&self) -> Vec<String> {
        self.ring.read().nodes()
    }

    /// Ring member responsible for `key`, if any
    pub fn node_for(&self, key: &str) -> Option<String> {
        self.route(key)
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    pub fn get_cache_stats(&self) -> TieredCacheStats {
        TieredCacheStats {
            hot: self.hot.stats(),
            distributed: self.distributed_counters.snapshot(0, 0),
            durable: self.durable_counters.snapshot(0, 0),
            distributed_enabled: self.distributed_enabled(),
            durable_enabled: self.durable_enabled(),
            ring_nodes: self.ring.read().len(),
        }
    }

    fn route(&self, key: &str) -> Option<String> {
        let routed = self.ring.read().get_node(key);
        match routed {
            Ok(node) => Some(node),
            Err(error) => {
                debug!(key = %key, error = %error, "Distributed tier has no route for key");
                None
            }
        }
    }

    fn active_nodes(&self) -> Vec<String> {
        if self.distributed_enabled() {
            self.ring.read().nodes()
        } else {
            Vec::new()
        }
    }

    async fn write_distributed(&self, entry: CacheEntry<V>) {
        if !self.distributed_enabled() {
            return;
        }
        let Some(node) = self.route(&entry.key) else {
            return;
        };
        let key = entry.key.clone();
        match self.remote.set(&node, entry).await {
            Ok(()) => self.events.publish(CacheEvent::Set {
                tier: CacheTier::Distributed,
                key,
            }),
            Err(error) => self.backend_failed(CacheTier::Distributed, "set", &error),
        }
    }

    async fn write_durable(&self, entry: CacheEntry<V>) {
        if !self.durable_enabled() {
            return;
        }
        let key = entry.key.clone();
        match self.durable.set(entry).await {
            Ok(()) => self.events.publish(CacheEvent::Set {
                tier: CacheTier::Durable,
                key,
            }),
            Err(error) => self.backend_failed(CacheTier::Durable, "set", &error),
        }
    }

    async fn delete_distributed(&self, key: &str) -> bool {
        if !self.distributed_enabled() {
            return false;
        }
        let Some(node) = self.route(key) else {
            return false;
        };
        match self.remote.delete(&node, key).await {
            Ok(removed) => {
                if removed {
                    self.events.publish(CacheEvent::Deleted {
                        tier: CacheTier::Distributed,
                        key: key.to_string(),
                    });
                }
                removed
            }
            Err(error) => {
                self.backend_failed(CacheTier::Distributed, "delete", &error);
                false
            }
        }
    }

    async fn delete_durable(&self, key: &str) -> bool {
        if !self.durable_enabled() {
            return false;
        }
        match self.durable.delete(key).await {
            Ok(removed) => {
                if removed {
                    self.events.publish(CacheEvent::Deleted {
                        tier: CacheTier::Durable,
                        key: key.to_string(),
                    });
                }
                removed
            }
            Err(error) => {
                self.backend_failed(CacheTier::Durable, "delete", &error);
                false
            }
        }
    }

    async fn invalidate_distributed(&self, tags: &[String]) -> Vec<String> {
        let nodes = self.active_nodes();
        let results = join_all(
            nodes
                .iter()
                .map(|node| self.remote.invalidate_by_tags(node, tags)),
        )
        .await;

        let mut removed = Vec::new();
        for result in results {
            match result {
                Ok(keys) => removed.extend(keys),
                Err(error) => self.backend_failed(CacheTier::Distributed, "invalidate_by_tags", &error),
            }
        }
        removed
    }

    async fn invalidate_durable(&self, tags: &[String]) -> Vec<String> {
        if !self.durable_enabled() {
            return Vec::new();
        }
        match self.durable.invalidate_by_tags(tags).await {
            Ok(keys) => keys,
            Err(error) => {
                self.backend_failed(CacheTier::Durable, "invalidate_by_tags", &error);
                Vec::new()
            }
        }
    }

    fn backend_failed(&self, tier: CacheTier, operation: &str, error: &CacheBackendError) {
        match tier {
            CacheTier::Distributed => self.distributed_counters.record_error(),
            CacheTier::Durable => self.durable_counters.record_error(),
            CacheTier::Hot => {}
        }
        warn!(
            tier = %tier,
            operation = %operation,
            error = %error,
            "🗄️ CACHE: Tier backend failed, continuing without it"
        );
        self.events.publish(CacheEvent::Error {
            tier,
            operation: operation.to_string(),
            message: error.to_string(),
        });
    }

    fn publish_hit(&self, tier: CacheTier, key: &str) {
        self.events.publish(CacheEvent::Hit {
            tier,
            key: key.to_string(),
        });
    }

    fn publish_miss(&self, tier: CacheTier, key: &str) {
        self.events.publish(CacheEvent::Miss {
            tier: Some(tier),
            key: key.to_string(),
        });
    }
}

impl<V> Drop for TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.hot.stop_cleanup();
    }
}
