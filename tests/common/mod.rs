#![allow(dead_code)]

pub mod mocks;
pub mod strategies;

pub use mocks::*;

use std::sync::Arc;
use tasklane::cache::TieredCache;
use tasklane::config::EngineConfig;
use tasklane::events::EventPublisher;
use tasklane::execution::{TaskExecutor, TaskResult};
use tasklane::pool::ResourcePool;

/// Install a test subscriber once; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Executor with its own pool, cache and event channel
pub struct TestEngine {
    pub executor: TaskExecutor<MockConnection>,
    pub factory: Arc<CountingFactory>,
    pub events: EventPublisher,
}

impl TestEngine {
    pub async fn new(config: EngineConfig) -> Self {
        init_test_logging();
        let events = EventPublisher::default();
        let factory = CountingFactory::new();
        let pool = Arc::new(
            ResourcePool::<MockConnection>::new(factory.clone(), config.pool.clone())
                .await
                .expect("pool should open its minimum handles"),
        );
        let cache: Arc<TieredCache<TaskResult>> =
            Arc::new(TieredCache::new(&config, events.clone()));
        let executor = TaskExecutor::new(&config, pool, cache, events.clone());
        Self {
            executor,
            factory,
            events,
        }
    }

    pub async fn for_test() -> Self {
        Self::new(EngineConfig::for_test()).await
    }
}
