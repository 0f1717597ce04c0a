//! # Tiered Caching
//!
//! The cache side of the engine: entries and statistics, the hot-tier
//! [`ExpiringMap`], the [`ConsistentHashRing`] routing the distributed tier,
//! the pluggable lower-tier backends and the [`TieredCache`] tying them
//! together.

pub mod backends;
pub mod entry;
pub mod expiring_map;
pub mod hash_ring;
pub mod tiered;

pub use backends::{
    BackendResult, CacheBackendError, DurableStore, InMemoryDurableStore, InMemoryRemoteTransport,
    NoopDurableStore, NoopRemoteTransport, RemoteCacheTransport, TierProbe,
};
pub use entry::{CacheEntry, CacheStats, CacheTier};
pub use expiring_map::{EvictionCallback, ExpiringMap};
pub use hash_ring::{ring_position, ConsistentHashRing, HashRingError};
pub use tiered::{TieredCache, TieredCacheStats};
