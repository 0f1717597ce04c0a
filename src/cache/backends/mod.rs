//! # Tier Backends
//!
//! Pluggable storage behind the distributed and durable cache tiers.
//!
//! The tiered cache only depends on the two traits below. Deployments plug in
//! their own transport (e.g. a Redis or memcached client) and store (e.g. a
//! database table); the crate ships no-op implementations that report the
//! tier as disabled plus in-memory implementations for single-process use and
//! tests.

use async_trait::async_trait;

use super::entry::CacheEntry;

mod memory;

pub use memory::{InMemoryDurableStore, InMemoryRemoteTransport};

/// Errors surfaced by a tier backend
///
/// The tiered cache absorbs these: they are logged, published as cache error
/// events and treated as a miss.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheBackendError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache backend operation '{operation}' failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("Cache value serialization failed: {0}")]
    Serialization(String),
}

impl CacheBackendError {
    pub fn operation_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, CacheBackendError>;

/// Outcome of looking a key up in one tier
#[derive(Debug, Clone, PartialEq)]
pub enum TierProbe<V> {
    Hit(CacheEntry<V>),
    Miss,
    /// Tier switched off by configuration or by its backend
    Disabled,
    Failed(CacheBackendError),
}

impl<V> TierProbe<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, TierProbe::Hit(_))
    }

    pub fn into_entry(self) -> Option<CacheEntry<V>> {
        match self {
            TierProbe::Hit(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Client for the nodes of the distributed tier
///
/// `node` is the ring member chosen by consistent hashing for the key.
#[async_trait]
pub trait RemoteCacheTransport<V>: Send + Sync
where
    V: Send + 'static,
{
    /// Whether this transport can serve requests at all
    fn is_enabled(&self) -> bool {
        true
    }

    async fn get(&self, node: &str, key: &str) -> BackendResult<Option<CacheEntry<V>>>;

    async fn set(&self, node: &str, entry: CacheEntry<V>) -> BackendResult<()>;

    async fn delete(&self, node: &str, key: &str) -> BackendResult<bool>;

    /// Remove every entry on `node` carrying any of `tags`, returning removed keys
    async fn invalidate_by_tags(&self, node: &str, tags: &[String]) -> BackendResult<Vec<String>>;

    async fn clear(&self, node: &str) -> BackendResult<()>;
}

/// Persistent store behind the durable tier
#[async_trait]
pub trait DurableStore<V>: Send + Sync
where
    V: Send + 'static,
{
    fn is_enabled(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> BackendResult<Option<CacheEntry<V>>>;

    async fn set(&self, entry: CacheEntry<V>) -> BackendResult<()>;

    async fn delete(&self, key: &str) -> BackendResult<bool>;

    async fn invalidate_by_tags(&self, tags: &[String]) -> BackendResult<Vec<String>>;

    async fn clear(&self) -> BackendResult<()>;
}

/// Transport used when no distributed tier is deployed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRemoteTransport;

#[async_trait]
impl<V> RemoteCacheTransport<V> for NoopRemoteTransport
where
    V: Send + 'static,
{
    fn is_enabled(&self) -> bool {
        false
    }

    async fn get(&self, _node: &str, _key: &str) -> BackendResult<Option<CacheEntry<V>>> {
        Ok(None)
    }

    async fn set(&self, _node: &str, _entry: CacheEntry<V>) -> BackendResult<()> {
        Ok(())
    }

    async fn delete(&self, _node: &str, _key: &str) -> BackendResult<bool> {
        Ok(false)
    }

    async fn invalidate_by_tags(&self, _node: &str, _tags: &[String]) -> BackendResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn clear(&self, _node: &str) -> BackendResult<()> {
        Ok(())
    }
}

/// Store used when no durable tier is deployed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDurableStore;

#[async_trait]
impl<V> DurableStore<V> for NoopDurableStore
where
    V: Send + 'static,
{
    fn is_enabled(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> BackendResult<Option<CacheEntry<V>>> {
        Ok(None)
    }

    async fn set(&self, _entry: CacheEntry<V>) -> BackendResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> BackendResult<bool> {
        Ok(false)
    }

    async fn invalidate_by_tags(&self, _tags: &[String]) -> BackendResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn clear(&self) -> BackendResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_backends_report_disabled() {
        let transport = NoopRemoteTransport;
        let store = NoopDurableStore;

        assert!(!RemoteCacheTransport::<u32>::is_enabled(&transport));
        assert!(!DurableStore::<u32>::is_enabled(&store));

        let found: Option<CacheEntry<u32>> = RemoteCacheTransport::get(&transport, "n", "k").await.unwrap();
        assert!(found.is_none());
        let found: Option<CacheEntry<u32>> = DurableStore::get(&store, "k").await.unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_probe_helpers() {
        let hit = TierProbe::Hit(CacheEntry::new("k", 1, std::time::Duration::from_secs(1)));
        assert!(hit.is_hit());
        assert_eq!(hit.into_entry().map(|e| e.value), Some(1));
        assert!(TierProbe::<u32>::Disabled.into_entry().is_none());
    }
}
