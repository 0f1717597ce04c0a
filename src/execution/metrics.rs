//! # Executor Metrics
//!
//! Counters and rolling windows maintained by the executor, and the
//! [`ExecutorMetrics`] snapshot published on every monitoring tick.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::error_classifier::ErrorCategory;
use super::memory::MemoryStats;
use crate::cache::TieredCacheStats;
use crate::constants::executor::EFFICIENCY_WINDOW;
use crate::pool::PoolStats;
use crate::resilience::CircuitState;

/// Execution durations kept for percentile estimates
const DURATION_SAMPLE_SIZE: usize = 1000;

/// Point-in-time view of one executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorMetrics {
    pub executor_id: Uuid,
    pub collected_at: DateTime<Utc>,
    pub uptime_seconds: u64,

    // Task counters
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub cache_hits: u64,
    /// Tasks answered by a concurrent execution of the same fingerprint
    pub coalesced: u64,
    pub retries: u64,
    pub slow_tasks: u64,
    pub deadline_exceeded: u64,
    /// Tasks refused because the executor was shutting down
    pub rejected: u64,
    pub error_counts: BTreeMap<String, u64>,
    /// failed / (completed + failed)
    pub error_rate: f64,

    // Timing
    pub avg_execution_time_ms: f64,
    pub p95_execution_time_ms: f64,
    pub p99_execution_time_ms: f64,

    // Batching
    pub batches_completed: u64,
    pub avg_batch_size: f64,
    /// Tasks per second averaged over the most recent batches
    pub batch_tasks_per_second: f64,

    // Live state
    pub in_flight: usize,
    pub queued: usize,
    pub history_success_rate: f64,
    pub history_average_ms: f64,
    pub circuit_breaker_state: Option<CircuitState>,

    pub pool: PoolStats,
    pub cache: TieredCacheStats,
    pub memory: MemoryStats,
}

/// Live gauges sampled from the executor's components at snapshot time
#[derive(Debug, Clone, Default)]
pub struct ComponentSnapshot {
    pub in_flight: usize,
    pub queued: usize,
    pub history_success_rate: f64,
    pub history_average: Duration,
    pub circuit_breaker_state: Option<CircuitState>,
    pub pool: PoolStats,
    pub cache: TieredCacheStats,
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, Copy)]
struct BatchSample {
    size: usize,
    tasks_per_second: f64,
}

/// Metrics collector shared by every operation of one executor
#[derive(Debug)]
pub struct MetricsCollector {
    executor_id: Uuid,
    started_at: Instant,

    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    retries: AtomicU64,
    slow_tasks: AtomicU64,
    deadline_exceeded: AtomicU64,
    rejected: AtomicU64,
    batches_completed: AtomicU64,
    total_execution_micros: AtomicU64,
    timed_executions: AtomicU64,

    error_counts: Mutex<BTreeMap<String, u64>>,
    durations: Mutex<VecDeque<Duration>>,
    batches: Mutex<VecDeque<BatchSample>>,
}

impl MetricsCollector {
    pub fn new(executor_id: Uuid) -> Self {
        Self {
            executor_id,
            started_at: Instant::now(),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            slow_tasks: AtomicU64::new(0),
            deadline_exceeded: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            batches_completed: AtomicU64::new(0),
            total_execution_micros: AtomicU64::new(0),
            timed_executions: AtomicU64::new(0),
            error_counts: Mutex::new(BTreeMap::new()),
            durations: Mutex::new(VecDeque::with_capacity(DURATION_SAMPLE_SIZE)),
            batches: Mutex::new(VecDeque::with_capacity(EFFICIENCY_WINDOW)),
        }
    }

    pub fn executor_id(&self) -> Uuid {
        self.executor_id
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A backend execution finished successfully
    pub fn record_completed(&self, execution_time: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(execution_time);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, category: ErrorCategory, execution_time: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if category == ErrorCategory::DeadlineExceeded {
            self.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
        }
        *self
            .error_counts
            .lock()
            .entry(category.to_string())
            .or_insert(0) += 1;
        self.record_duration(execution_time);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_task(&self) {
        self.slow_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one sub-batch and fold its throughput into the rolling window
    pub fn record_batch(&self, size: usize, elapsed: Duration) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        let seconds = elapsed.as_secs_f64();
        let tasks_per_second = if seconds > 0.0 {
            size as f64 / seconds
        } else {
            size as f64
        };

        let mut batches = self.batches.lock();
        if batches.len() == EFFICIENCY_WINDOW {
            batches.pop_front();
        }
        batches.push_back(BatchSample {
            size,
            tasks_per_second,
        });
    }

    /// Rolling tasks per second across the most recent batches
    pub fn batch_efficiency(&self) -> f64 {
        let batches = self.batches.lock();
        if batches.is_empty() {
            return 0.0;
        }
        batches.iter().map(|b| b.tasks_per_second).sum::<f64>() / batches.len() as f64
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, components: ComponentSnapshot) -> ExecutorMetrics {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let finished = completed + failed;
        let error_rate = if finished > 0 {
            failed as f64 / finished as f64
        } else {
            0.0
        };

        let timed = self.timed_executions.load(Ordering::Relaxed);
        let avg_execution_time_ms = if timed > 0 {
            self.total_execution_micros.load(Ordering::Relaxed) as f64 / timed as f64 / 1000.0
        } else {
            0.0
        };
        let (p95, p99) = self.percentiles();

        let avg_batch_size = {
            let batches = self.batches.lock();
            if batches.is_empty() {
                0.0
            } else {
                batches.iter().map(|b| b.size as f64).sum::<f64>() / batches.len() as f64
            }
        };

        ExecutorMetrics {
            executor_id: self.executor_id,
            collected_at: Utc::now(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            tasks_submitted: self.submitted.load(Ordering::Relaxed),
            tasks_completed: completed,
            tasks_failed: failed,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            slow_tasks: self.slow_tasks.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            error_counts: self.error_counts.lock().clone(),
            error_rate,
            avg_execution_time_ms,
            p95_execution_time_ms: p95,
            p99_execution_time_ms: p99,
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            avg_batch_size,
            batch_tasks_per_second: self.batch_efficiency(),
            in_flight: components.in_flight,
            queued: components.queued,
            history_success_rate: components.history_success_rate,
            history_average_ms: components.history_average.as_secs_f64() * 1000.0,
            circuit_breaker_state: components.circuit_breaker_state,
            pool: components.pool,
            cache: components.cache,
            memory: components.memory,
        }
    }

    fn record_duration(&self, duration: Duration) {
        self.total_execution_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.timed_executions.fetch_add(1, Ordering::Relaxed);

        let mut durations = self.durations.lock();
        if durations.len() == DURATION_SAMPLE_SIZE {
            durations.pop_front();
        }
        durations.push_back(duration);
    }

    fn percentiles(&self) -> (f64, f64) {
        let mut sorted: Vec<Duration> = self.durations.lock().iter().copied().collect();
        if sorted.is_empty() {
            return (0.0, 0.0);
        }
        sorted.sort_unstable();
        let at = |quantile: f64| {
            let index = ((sorted.len() as f64 * quantile).ceil() as usize).clamp(1, sorted.len()) - 1;
            sorted[index].as_secs_f64() * 1000.0
        };
        (at(0.95), at(0.99))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_error_rate() {
        let collector = MetricsCollector::new(Uuid::new_v4());
        collector.record_submitted();
        collector.record_submitted();
        collector.record_submitted();
        collector.record_completed(Duration::from_millis(10));
        collector.record_cache_hit();
        collector.record_failed(ErrorCategory::DeadlineExceeded, Duration::from_millis(30));

        let metrics = collector.snapshot(ComponentSnapshot::default());
        assert_eq!(metrics.tasks_submitted, 3);
        assert_eq!(metrics.tasks_completed, 2);
        assert_eq!(metrics.tasks_failed, 1);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.deadline_exceeded, 1);
        assert_eq!(metrics.error_counts["Deadline Exceeded"], 1);
        assert!((metrics.error_rate - 1.0 / 3.0).abs() < f64::EPSILON);
        assert!((metrics.avg_execution_time_ms - 20.0).abs() < 0.001);
    }

    #[test]
    fn test_batch_efficiency_is_rolling_average() {
        let collector = MetricsCollector::new(Uuid::new_v4());
        assert_eq!(collector.batch_efficiency(), 0.0);

        collector.record_batch(10, Duration::from_secs(1));
        collector.record_batch(10, Duration::from_millis(500));
        assert!((collector.batch_efficiency() - 15.0).abs() < 0.001);

        for _ in 0..EFFICIENCY_WINDOW {
            collector.record_batch(5, Duration::from_secs(1));
        }
        assert!((collector.batch_efficiency() - 5.0).abs() < 0.001);
        assert_eq!(
            collector.snapshot(ComponentSnapshot::default()).batches_completed,
            EFFICIENCY_WINDOW as u64 + 2
        );
    }

    #[test]
    fn test_percentiles() {
        let collector = MetricsCollector::new(Uuid::new_v4());
        for millis in 1..=100 {
            collector.record_completed(Duration::from_millis(millis));
        }
        let metrics = collector.snapshot(ComponentSnapshot::default());
        assert!((metrics.p95_execution_time_ms - 95.0).abs() < 0.001);
        assert!((metrics.p99_execution_time_ms - 99.0).abs() < 0.001);
    }
}
