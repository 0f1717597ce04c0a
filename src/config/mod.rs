//! # Engine Configuration
//!
//! Configuration for every component of one engine instance: the hot cache,
//! the distributed and durable tiers, the resource pool, the task executor,
//! memory optimisation and monitoring.
//!
//! ## Architecture
//!
//! - **Defaults everywhere**: every field has a default, so partial files load
//! - **Environment presets**: `for_test()` and `for_development()` shorten TTLs and intervals
//! - **Environment overrides**: `TASKLANE_*` variables patch a loaded config
//! - **Explicit validation**: impossible combinations fail at load time
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasklane::config::{ConfigManager, EngineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // From a file layered with TASKLANE__SECTION__FIELD environment variables
//! let manager = ConfigManager::load_from_file("config/tasklane.yaml")?;
//! let pool_max = manager.config().pool.max;
//!
//! // Or programmatically
//! let config = EngineConfig::for_test();
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::info;

use crate::constants;
use crate::resilience::CircuitBreakerConfig;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration for one engine instance
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// In-process hot tier
    pub hot_cache: HotCacheConfig,

    /// Hash-ring routed distributed tier
    pub distributed_cache: DistributedCacheConfig,

    /// Durable tier
    pub durable_cache: DurableCacheConfig,

    /// Pool guarding the external resource
    pub pool: PoolConfig,

    /// Task executor
    pub executor: ExecutorConfig,

    /// Periodic sweeps and memory pressure handling
    pub memory_optimization: MemoryOptimizationConfig,

    /// Metrics publication and slow task detection
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HotCacheConfig {
    pub max_size: usize,
    pub default_ttl_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl HotCacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for HotCacheConfig {
    fn default() -> Self {
        Self {
            max_size: constants::hot_cache::MAX_SIZE,
            default_ttl_ms: constants::hot_cache::DEFAULT_TTL_MS,
            cleanup_interval_ms: constants::hot_cache::CLEANUP_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DistributedCacheConfig {
    pub enabled: bool,
    pub virtual_nodes_per_node: usize,
    /// Initial ring membership
    pub nodes: Vec<String>,
}

impl Default for DistributedCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            virtual_nodes_per_node: constants::distributed_cache::VIRTUAL_NODES_PER_NODE,
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DurableCacheConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub adaptive_resize: bool,
    /// Upper bound on waiting for a handle; `0` waits indefinitely
    pub acquire_timeout_ms: u64,
    /// Quiet period after which idle handles above `min` are closed (adaptive mode)
    pub idle_timeout_ms: u64,
    /// Maintenance tick for adaptive resizing
    pub resize_interval_ms: u64,
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn resize_interval(&self) -> Duration {
        Duration::from_millis(self.resize_interval_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: constants::pool::MIN,
            max: constants::pool::MAX,
            adaptive_resize: true,
            acquire_timeout_ms: constants::pool::ACQUIRE_TIMEOUT_MS,
            idle_timeout_ms: constants::pool::IDLE_TIMEOUT_MS,
            resize_interval_ms: constants::pool::RESIZE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum tasks admitted past the queue at once
    pub concurrency: usize,
    pub caching_enabled: bool,
    pub cache_ttl_ms: u64,
    /// Sub-batch size for optimized batches and background queue ticks
    pub batch_size: usize,
    /// Background queue drain interval
    pub batch_timeout_ms: u64,
    /// Capacity of the execution history ring
    pub history_size: usize,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ExecutorConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: constants::executor::CONCURRENCY,
            caching_enabled: true,
            cache_ttl_ms: constants::executor::CACHE_TTL_MS,
            batch_size: constants::executor::BATCH_SIZE,
            batch_timeout_ms: constants::executor::BATCH_TIMEOUT_MS,
            history_size: constants::executor::HISTORY_SIZE,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Retry policy for retryable execution failures
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one; `1` disables retries
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::executor::RETRY_MAX_ATTEMPTS,
            base_delay_ms: constants::executor::RETRY_BASE_DELAY_MS,
            max_delay_ms: constants::executor::RETRY_MAX_DELAY_MS,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryOptimizationConfig {
    pub enabled: bool,
    pub gc_interval_ms: u64,
    /// Resident memory threshold that triggers an immediate sweep
    pub max_memory_usage_bytes: u64,
    /// Minimum spacing between two memory samples
    pub pressure_sample_interval_ms: u64,
}

impl MemoryOptimizationConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn pressure_sample_interval(&self) -> Duration {
        Duration::from_millis(self.pressure_sample_interval_ms)
    }
}

impl Default for MemoryOptimizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gc_interval_ms: constants::memory::GC_INTERVAL_MS,
            max_memory_usage_bytes: constants::memory::MAX_MEMORY_USAGE_BYTES,
            pressure_sample_interval_ms: constants::memory::PRESSURE_SAMPLE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub metrics_interval_ms: u64,
    pub slow_task_threshold_ms: u64,
}

impl MonitoringConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn slow_task_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_task_threshold_ms)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_interval_ms: constants::monitoring::METRICS_INTERVAL_MS,
            slow_task_threshold_ms: constants::monitoring::SLOW_TASK_THRESHOLD_MS,
        }
    }
}

impl EngineConfig {
    /// Test-optimized configuration with short TTLs and fast timers
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.hot_cache.default_ttl_ms = 5_000;
        config.hot_cache.cleanup_interval_ms = 1_000;
        config.pool.min = 1;
        config.pool.max = 4;
        config.pool.acquire_timeout_ms = 5_000;
        config.pool.idle_timeout_ms = 1_000;
        config.pool.resize_interval_ms = 100;
        config.executor.cache_ttl_ms = 5_000;
        config.executor.batch_timeout_ms = 20;
        config.executor.history_size = 100;
        config.executor.retry.base_delay_ms = 5;
        config.executor.retry.max_delay_ms = 50;
        config.memory_optimization.gc_interval_ms = 1_000;
        config.monitoring.metrics_interval_ms = 1_000;
        config.monitoring.slow_task_threshold_ms = 1_000;
        config
    }

    /// Development configuration with moderate intervals
    pub fn for_development() -> Self {
        let mut config = Self::default();
        config.hot_cache.default_ttl_ms = 60_000;
        config.hot_cache.cleanup_interval_ms = 10_000;
        config.executor.cache_ttl_ms = 300_000;
        config.monitoring.metrics_interval_ms = 10_000;
        config
    }

    /// Preset selected from `TASKLANE_ENV` (falls back to `APP_ENV`), with env overrides applied
    pub fn from_environment() -> Self {
        let environment = env::var("TASKLANE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "production".to_string());

        let config = match environment.as_str() {
            "test" => Self::for_test(),
            "development" => Self::for_development(),
            _ => Self::default(),
        };

        info!(environment = %environment, "🔧 CONFIG: Loaded environment preset");
        config.with_env_overrides()
    }

    /// Apply flat `TASKLANE_*` environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            env::var(name).ok().and_then(|value| value.parse().ok())
        }

        if let Some(max_size) = parsed("TASKLANE_HOT_CACHE_MAX_SIZE") {
            self.hot_cache.max_size = max_size;
            info!("Hot cache max size override: {}", max_size);
        }
        if let Some(ttl) = parsed("TASKLANE_HOT_CACHE_DEFAULT_TTL_MS") {
            self.hot_cache.default_ttl_ms = ttl;
            info!("Hot cache default TTL override: {}ms", ttl);
        }
        if let Some(enabled) = parsed("TASKLANE_DISTRIBUTED_CACHE_ENABLED") {
            self.distributed_cache.enabled = enabled;
            info!("Distributed cache enabled override: {}", enabled);
        }
        if let Some(enabled) = parsed("TASKLANE_DURABLE_CACHE_ENABLED") {
            self.durable_cache.enabled = enabled;
            info!("Durable cache enabled override: {}", enabled);
        }
        if let Some(min) = parsed("TASKLANE_POOL_MIN") {
            self.pool.min = min;
            info!("Pool min override: {}", min);
        }
        if let Some(max) = parsed("TASKLANE_POOL_MAX") {
            self.pool.max = max;
            info!("Pool max override: {}", max);
        }
        if let Some(concurrency) = parsed("TASKLANE_EXECUTOR_CONCURRENCY") {
            self.executor.concurrency = concurrency;
            info!("Executor concurrency override: {}", concurrency);
        }
        if let Some(enabled) = parsed("TASKLANE_EXECUTOR_CACHING_ENABLED") {
            self.executor.caching_enabled = enabled;
            info!("Executor caching enabled override: {}", enabled);
        }
        if let Some(bytes) = parsed("TASKLANE_MAX_MEMORY_USAGE_BYTES") {
            self.memory_optimization.max_memory_usage_bytes = bytes;
            info!("Max memory usage override: {} bytes", bytes);
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.hot_cache.max_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "hot_cache.max_size",
                "must be greater than 0",
            ));
        }
        if self.hot_cache.cleanup_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "hot_cache.cleanup_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.distributed_cache.virtual_nodes_per_node == 0 {
            return Err(ConfigurationError::invalid_value(
                "distributed_cache.virtual_nodes_per_node",
                "must be greater than 0",
            ));
        }
        if self.pool.max == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.max",
                "must be greater than 0",
            ));
        }
        if self.pool.min > self.pool.max {
            return Err(ConfigurationError::invalid_value(
                "pool.min",
                format!(
                    "min ({}) cannot exceed max ({})",
                    self.pool.min, self.pool.max
                ),
            ));
        }
        if self.pool.adaptive_resize && self.pool.resize_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.resize_interval_ms",
                "must be greater than 0 when adaptive_resize is enabled",
            ));
        }
        if self.executor.concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.concurrency",
                "must be greater than 0",
            ));
        }
        if self.executor.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.batch_size",
                "must be greater than 0",
            ));
        }
        if self.executor.batch_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.batch_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.executor.history_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.history_size",
                "must be greater than 0",
            ));
        }
        if self.executor.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.retry.max_attempts",
                "must be at least 1",
            ));
        }
        let multiplier = self.executor.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "executor.retry.backoff_multiplier",
                format!("must be a finite value of at least 1.0, got {multiplier}"),
            ));
        }
        if !(0.0..=1.0).contains(&self.executor.retry.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "executor.retry.jitter_factor",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.memory_optimization.enabled && self.memory_optimization.gc_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "memory_optimization.gc_interval_ms",
                "must be greater than 0 when memory optimization is enabled",
            ));
        }
        if self.monitoring.metrics_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "monitoring.metrics_interval_ms",
                "must be greater than 0",
            ));
        }

        self.executor
            .circuit_breaker
            .validate()
            .map_err(|reason| ConfigurationError::invalid_value("executor.circuit_breaker", reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.distributed_cache.virtual_nodes_per_node, 100);
        assert!(!config.distributed_cache.enabled);
        assert!(config.executor.caching_enabled);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(EngineConfig::for_test().validate().is_ok());
        assert!(EngineConfig::for_development().validate().is_ok());
    }

    #[test]
    fn test_pool_min_above_max_rejected() {
        let mut config = EngineConfig::default();
        config.pool.min = 8;
        config.pool.max = 4;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool.min"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = EngineConfig::default();
        config.executor.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_multiplier_must_be_finite_and_growing() {
        for multiplier in [-2.0, 0.5, f64::NAN, f64::INFINITY] {
            let mut config = EngineConfig::default();
            config.executor.retry.backoff_multiplier = multiplier;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("backoff_multiplier"));
        }

        let mut config = EngineConfig::default();
        config.executor.retry.backoff_multiplier = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_acquire_timeout_zero_means_unbounded() {
        let mut pool = PoolConfig::default();
        pool.acquire_timeout_ms = 0;
        assert!(pool.acquire_timeout().is_none());
        pool.acquire_timeout_ms = 250;
        assert_eq!(pool.acquire_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"pool": {"max": 4}, "executor": {"concurrency": 2}}"#)
                .unwrap();
        assert_eq!(config.pool.max, 4);
        assert_eq!(config.pool.min, constants::pool::MIN);
        assert_eq!(config.executor.concurrency, 2);
        assert_eq!(config.hot_cache, HotCacheConfig::default());
    }
}
