//! # Task Execution
//!
//! Everything between "here is a task" and "here is its result": the task
//! model and fingerprinting, the [`TaskExecutor`] with its cache, pool and
//! circuit breaker wiring, error classification, bounded history, metrics
//! and memory-pressure handling.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tasklane::cache::TieredCache;
//! use tasklane::config::EngineConfig;
//! use tasklane::events::EventPublisher;
//! use tasklane::execution::{BackendError, BackendResponse, ExecutionBackend, Task, TaskExecutor};
//! use tasklane::pool::{PoolError, ResourceFactory, ResourcePool};
//!
//! struct Connections;
//!
//! #[async_trait]
//! impl ResourceFactory<String> for Connections {
//!     async fn create(&self) -> Result<String, PoolError> {
//!         Ok("connection".to_string())
//!     }
//! }
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ExecutionBackend<String> for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn invoke(&self, task: &Task, _conn: Arc<String>) -> Result<BackendResponse, BackendError> {
//!         Ok(BackendResponse::new(task.instructions.clone()))
//!     }
//! }
//!
//! # async fn example() -> Result<(), PoolError> {
//! let config = EngineConfig::default();
//! let events = EventPublisher::default();
//! let pool = Arc::new(ResourcePool::new(Arc::new(Connections), config.pool.clone()).await?);
//! let cache = Arc::new(TieredCache::new(&config, events.clone()));
//! let executor = TaskExecutor::new(&config, pool, cache, events);
//!
//! let result = executor.execute_task(Task::new("echo", "hello"), Arc::new(Echo)).await;
//! assert!(result.success);
//! executor.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod buffers;
pub mod error_classifier;
pub mod executor;
pub mod history;
pub mod memory;
pub mod metrics;
pub mod task;

pub use backend::{BackendError, BackendResponse, ExecutionBackend};
pub use buffers::BufferPool;
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, ErrorClassifierConfig, ErrorContext,
    ExecutionFailure, StandardErrorClassifier, TaskError, NETWORK_ERROR_CODES,
};
pub use executor::{SharedBackend, TaskExecutor};
pub use history::{BoundedHistory, ExecutionRecord, ExecutionStatus};
pub use memory::{MemoryManager, MemoryProbe, MemoryStats, ProcessMemoryProbe, Reclaimable};
pub use metrics::{ComponentSnapshot, ExecutorMetrics, MetricsCollector};
pub use task::{
    fingerprint, fingerprint_into, ResourceUsage, ResultSource, Task, TaskConstraints,
    TaskContext, TaskPriority, TaskResult, TaskState,
};
