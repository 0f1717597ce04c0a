//! In-memory tier backends for single-process deployments and tests

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{BackendResult, CacheBackendError, DurableStore, RemoteCacheTransport};
use crate::cache::entry::CacheEntry;

/// Shared failure switch and call counter for the in-memory backends
#[derive(Debug, Default)]
struct Faults {
    failing: AtomicBool,
    calls: AtomicU64,
}

impl Faults {
    fn check(&self, operation: &str) -> BackendResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            Err(CacheBackendError::Unavailable(format!(
                "injected failure during {operation}"
            )))
        } else {
            Ok(())
        }
    }
}

fn live_entry<V: Clone>(
    entries: &DashMap<String, CacheEntry<V>>,
    key: &str,
) -> Option<CacheEntry<V>> {
    let expired = match entries.get(key) {
        None => return None,
        Some(entry) if !entry.is_expired() => return Some(entry.clone()),
        Some(_) => true,
    };
    if expired {
        entries.remove(key);
    }
    None
}

fn remove_tagged<V>(entries: &DashMap<String, CacheEntry<V>>, tags: &[String]) -> Vec<String> {
    let keys: Vec<String> = entries
        .iter()
        .filter(|entry| entry.value().has_any_tag(tags))
        .map(|entry| entry.key().clone())
        .collect();
    keys.into_iter()
        .filter(|key| entries.remove(key).is_some())
        .collect()
}

/// Distributed-tier transport keeping one map per node in this process
#[derive(Debug)]
pub struct InMemoryRemoteTransport<V> {
    nodes: DashMap<String, DashMap<String, CacheEntry<V>>>,
    faults: Faults,
}

impl<V> Default for InMemoryRemoteTransport<V> {
    fn default() -> Self {
        Self {
            nodes: DashMap::new(),
            faults: Faults::default(),
        }
    }
}

impl<V> InMemoryRemoteTransport<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `CacheBackendError::Unavailable`
    pub fn set_failing(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::Relaxed);
    }

    /// Number of calls made against the transport
    pub fn call_count(&self) -> u64 {
        self.faults.calls.load(Ordering::Relaxed)
    }

    /// Whether `node` currently stores `key`
    pub fn node_contains(&self, node: &str, key: &str) -> bool {
        self.nodes
            .get(node)
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn node_len(&self, node: &str) -> usize {
        self.nodes.get(node).map(|entries| entries.len()).unwrap_or(0)
    }
}

#[async_trait]
impl<V> RemoteCacheTransport<V> for InMemoryRemoteTransport<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, node: &str, key: &str) -> BackendResult<Option<CacheEntry<V>>> {
        self.faults.check("get")?;
        Ok(self
            .nodes
            .get(node)
            .and_then(|entries| live_entry(&entries, key)))
    }

    async fn set(&self, node: &str, entry: CacheEntry<V>) -> BackendResult<()> {
        self.faults.check("set")?;
        self.nodes
            .entry(node.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, node: &str, key: &str) -> BackendResult<bool> {
        self.faults.check("delete")?;
        Ok(self
            .nodes
            .get(node)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn invalidate_by_tags(&self, node: &str, tags: &[String]) -> BackendResult<Vec<String>> {
        self.faults.check("invalidate_by_tags")?;
        Ok(self
            .nodes
            .get(node)
            .map(|entries| remove_tagged(&entries, tags))
            .unwrap_or_default())
    }

    async fn clear(&self, node: &str) -> BackendResult<()> {
        self.faults.check("clear")?;
        if let Some(entries) = self.nodes.get(node) {
            entries.clear();
        }
        Ok(())
    }
}

/// Durable-tier store kept in process memory
#[derive(Debug)]
pub struct InMemoryDurableStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
    faults: Faults,
}

impl<V> Default for InMemoryDurableStore<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            faults: Faults::default(),
        }
    }
}

impl<V> InMemoryDurableStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> u64 {
        self.faults.calls.load(Ordering::Relaxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<V> DurableStore<V> for InMemoryDurableStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> BackendResult<Option<CacheEntry<V>>> {
        self.faults.check("get")?;
        Ok(live_entry(&self.entries, key))
    }

    async fn set(&self, entry: CacheEntry<V>) -> BackendResult<()> {
        self.faults.check("set")?;
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        self.faults.check("delete")?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> BackendResult<Vec<String>> {
        self.faults.check("invalidate_by_tags")?;
        Ok(remove_tagged(&self.entries, tags))
    }

    async fn clear(&self) -> BackendResult<()> {
        self.faults.check("clear")?;
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_remote_transport_isolates_nodes() {
        let transport = InMemoryRemoteTransport::new();
        transport
            .set("a", CacheEntry::new("k", 1u32, Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(transport.get("a", "k").await.unwrap().map(|e| e.value), Some(1));
        assert!(transport.get("b", "k").await.unwrap().is_none());
        assert!(transport.node_contains("a", "k"));
        assert_eq!(transport.node_len("b"), 0);
    }

    #[tokio::test]
    async fn test_expired_entries_not_served() {
        let store = InMemoryDurableStore::new();
        store
            .set(CacheEntry::new("k", 1u32, Duration::from_millis(5)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn test_invalidate_by_tags() {
        let store = InMemoryDurableStore::new();
        store
            .set(CacheEntry::new("a", 1u32, Duration::from_secs(60)).with_tags(["x"]))
            .await
            .unwrap();
        store
            .set(CacheEntry::new("b", 2u32, Duration::from_secs(60)).with_tags(["y"]))
            .await
            .unwrap();

        let removed = store.invalidate_by_tags(&["x".to_string()]).await.unwrap();
        assert_eq!(removed, vec!["a".to_string()]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store: InMemoryDurableStore<u32> = InMemoryDurableStore::new();
        store.set_failing(true);
        assert!(matches!(
            store.get("k").await,
            Err(CacheBackendError::Unavailable(_))
        ));

        store.set_failing(false);
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.call_count(), 2);
    }
}
