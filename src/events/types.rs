use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::cache::CacheTier;
use crate::execution::{ErrorCategory, ExecutorMetrics};

/// Why an entry left a cache tier without an explicit delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// TTL elapsed (lazy expiry on read or periodic sweep)
    Expired,
    /// Least-recently-used entry dropped to respect `max_size`
    Capacity,
}

/// Cache notifications (`hit`, `miss`, `set`, `deleted`, `evicted`, `invalidated`, `error`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    Hit {
        tier: CacheTier,
        key: String,
    },
    /// `tier` is `None` when every enabled tier missed
    Miss {
        tier: Option<CacheTier>,
        key: String,
    },
    Set {
        tier: CacheTier,
        key: String,
    },
    Deleted {
        tier: CacheTier,
        key: String,
    },
    Evicted {
        tier: CacheTier,
        key: String,
        reason: EvictionReason,
    },
    Invalidated {
        tags: Vec<String>,
        keys: Vec<String>,
    },
    Error {
        tier: CacheTier,
        operation: String,
        message: String,
    },
}

/// Hash ring membership changes (`nodeAdded`, `nodeRemoved`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RingEvent {
    NodeAdded { node: String, positions: usize },
    NodeRemoved { node: String, positions: usize },
}

/// Task lifecycle notifications (`task:completed`, `task:failed`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Completed {
        task_id: Uuid,
        kind: String,
        execution_time: Duration,
        from_cache: bool,
    },
    Failed {
        task_id: Uuid,
        kind: String,
        execution_time: Duration,
        category: ErrorCategory,
        retryable: bool,
        message: String,
    },
}

/// Every notification the engine publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EngineEvent {
    Cache(CacheEvent),
    Ring(RingEvent),
    Task(TaskEvent),
    Metrics(Box<ExecutorMetrics>),
    Error { component: String, message: String },
}

impl EngineEvent {
    /// Short notification name, matching the names used by log consumers
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Cache(CacheEvent::Hit { .. }) => "hit",
            EngineEvent::Cache(CacheEvent::Miss { .. }) => "miss",
            EngineEvent::Cache(CacheEvent::Set { .. }) => "set",
            EngineEvent::Cache(CacheEvent::Deleted { .. }) => "deleted",
            EngineEvent::Cache(CacheEvent::Evicted { .. }) => "evicted",
            EngineEvent::Cache(CacheEvent::Invalidated { .. }) => "invalidated",
            EngineEvent::Cache(CacheEvent::Error { .. }) => "error",
            EngineEvent::Ring(RingEvent::NodeAdded { .. }) => "nodeAdded",
            EngineEvent::Ring(RingEvent::NodeRemoved { .. }) => "nodeRemoved",
            EngineEvent::Task(TaskEvent::Completed { .. }) => "task:completed",
            EngineEvent::Task(TaskEvent::Failed { .. }) => "task:failed",
            EngineEvent::Metrics(_) => "metrics",
            EngineEvent::Error { .. } => "error",
        }
    }
}

impl From<CacheEvent> for EngineEvent {
    fn from(event: CacheEvent) -> Self {
        EngineEvent::Cache(event)
    }
}

impl From<RingEvent> for EngineEvent {
    fn from(event: RingEvent) -> Self {
        EngineEvent::Ring(event)
    }
}

impl From<TaskEvent> for EngineEvent {
    fn from(event: TaskEvent) -> Self {
        EngineEvent::Task(event)
    }
}
