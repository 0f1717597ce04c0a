#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasklane
//!
//! Tiered cache and bounded concurrent task execution engine for work that
//! calls a scarce, slow or rate-limited external service.
//!
//! ## Overview
//!
//! Callers hand [`Task`](execution::Task)s to a [`TaskExecutor`](execution::TaskExecutor).
//! Identical tasks are answered from a multi-tier cache, concurrent identical
//! tasks share one execution, and the rest run against a bounded
//! [`ResourcePool`](pool::ResourcePool) of handles to the external service
//! with a concurrency cap, deadlines, retries and a circuit breaker.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────── TaskExecutor ────────────────────┐
//!  Task ──────▶  │ fingerprint ─▶ TieredCache ─▶ in-flight ─▶ Semaphore  │
//!                │                  │ hot (LRU + TTL)            │       │
//!                │                  │ distributed (hash ring)    ▼       │
//!                │                  │ durable            ResourcePool    │
//!                │                                            │         │
//!                │        CircuitBreaker ─▶ ExecutionBackend ◀┘         │
//!                └──────────────────────────────────────────────────────┘
//!                       │ EngineEvent (broadcast) │ ExecutorMetrics
//! ```
//!
//! ## Module Organization
//!
//! - [`cache`] - Cache entries, expiring LRU map, consistent hash ring, tiered cache
//! - [`pool`] - Bounded resource pool with adaptive sizing
//! - [`execution`] - Tasks, executor, error classification, history, metrics
//! - [`resilience`] - Circuit breaker guarding the execution backend
//! - [`config`] - Engine configuration sections and file/environment loader
//! - [`events`] - Typed engine events on a broadcast channel
//! - [`error`] - Crate-level error type
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! cargo bench --features benchmarks
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod pool;
pub mod resilience;

pub use cache::{CacheEntry, CacheStats, CacheTier, ConsistentHashRing, ExpiringMap, TieredCache};
pub use config::{ConfigManager, EngineConfig};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventPublisher};
pub use execution::{
    BackendError, BackendResponse, ErrorCategory, ExecutionBackend, Task, TaskError,
    TaskExecutor, TaskResult,
};
pub use pool::{PoolError, ResourceFactory, ResourcePool};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
