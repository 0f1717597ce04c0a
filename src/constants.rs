//! # Engine Constants
//!
//! Default values shared by the configuration sections and the components that
//! fall back to them when constructed without a full [`EngineConfig`](crate::config::EngineConfig).

use std::time::Duration;

/// Hot tier defaults
pub mod hot_cache {
    pub const MAX_SIZE: usize = 1000;
    pub const DEFAULT_TTL_MS: u64 = 300_000;
    pub const CLEANUP_INTERVAL_MS: u64 = 60_000;
}

/// Distributed tier defaults
pub mod distributed_cache {
    pub const VIRTUAL_NODES_PER_NODE: usize = 100;
}

/// Resource pool defaults
pub mod pool {
    pub const MIN: usize = 2;
    pub const MAX: usize = 10;
    pub const ACQUIRE_TIMEOUT_MS: u64 = 30_000;
    pub const IDLE_TIMEOUT_MS: u64 = 60_000;
    pub const RESIZE_INTERVAL_MS: u64 = 5_000;
    /// Consecutive maintenance ticks with queued callers before the pool pre-warms
    pub const GROW_AFTER_PRESSURED_TICKS: u32 = 2;
}

/// Task executor defaults
pub mod executor {
    pub const CONCURRENCY: usize = 5;
    pub const CACHE_TTL_MS: u64 = 3_600_000;
    pub const BATCH_SIZE: usize = 10;
    pub const BATCH_TIMEOUT_MS: u64 = 100;
    pub const HISTORY_SIZE: usize = 1000;
    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 250;
    pub const RETRY_MAX_DELAY_MS: u64 = 10_000;
    /// Window of batches averaged for the tasks-per-second efficiency metric
    pub const EFFICIENCY_WINDOW: usize = 20;
}

/// Memory optimisation defaults
pub mod memory {
    pub const GC_INTERVAL_MS: u64 = 30_000;
    pub const MAX_MEMORY_USAGE_BYTES: u64 = 512 * 1024 * 1024;
    pub const PRESSURE_SAMPLE_INTERVAL_MS: u64 = 1_000;
    pub const SCRATCH_BUFFER_CAPACITY: usize = 1024;
    pub const SCRATCH_POOL_SIZE: usize = 32;
}

/// Monitoring defaults
pub mod monitoring {
    pub const METRICS_INTERVAL_MS: u64 = 60_000;
    pub const SLOW_TASK_THRESHOLD_MS: u64 = 10_000;
}

/// Capacity of the engine event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Grace period used when stopping background loops
pub const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(5);
