//! # Memory Pressure Management
//!
//! A periodic cycle sweeps expired cache entries and releases pooled scratch
//! buffers. Between cycles the executor calls
//! [`MemoryManager::check_pressure`] after each execution; when resident
//! memory is above the configured ceiling the cycle is woken immediately
//! instead of waiting for the next tick.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Pid, System};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::buffers::BufferPool;
use crate::cache::TieredCache;
use crate::config::MemoryOptimizationConfig;

/// Source of the current memory footprint
pub trait MemoryProbe: Send + Sync {
    /// Bytes in use, `None` when the platform cannot tell
    fn current_usage(&self) -> Option<u64>;
}

/// Resident memory of this process, read through `sysinfo`
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(error) => {
                warn!(error = %error, "🧠 MEMORY: Current process id unavailable, pressure checks disabled");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn current_usage(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

/// Something holding memory that a sweep can give back
pub trait Reclaimable: Send + Sync {
    /// Drop what is no longer needed, returning the number of entries released
    fn reclaim(&self) -> usize;
}

impl<V> Reclaimable for TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn reclaim(&self) -> usize {
        self.sweep_expired()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub cycles: u64,
    /// Cycles triggered by pressure rather than the timer
    pub forced_cycles: u64,
    pub pressure_events: u64,
    pub entries_reclaimed: u64,
    pub buffers_released: u64,
    pub last_usage_bytes: Option<u64>,
}

pub struct MemoryManager {
    config: MemoryOptimizationConfig,
    probe: Arc<dyn MemoryProbe>,
    target: Arc<dyn Reclaimable>,
    buffers: Arc<BufferPool>,
    wake: Notify,
    last_sample: Mutex<Option<Instant>>,
    cycles: AtomicU64,
    forced_cycles: AtomicU64,
    pressure_events: AtomicU64,
    entries_reclaimed: AtomicU64,
    buffers_released: AtomicU64,
    last_usage: Mutex<Option<u64>>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl MemoryManager {
    pub fn new(
        config: MemoryOptimizationConfig,
        target: Arc<dyn Reclaimable>,
        buffers: Arc<BufferPool>,
    ) -> Self {
        Self {
            config,
            probe: Arc::new(ProcessMemoryProbe::new()),
            target,
            buffers,
            wake: Notify::new(),
            last_sample: Mutex::new(None),
            cycles: AtomicU64::new(0),
            forced_cycles: AtomicU64::new(0),
            pressure_events: AtomicU64::new(0),
            entries_reclaimed: AtomicU64::new(0),
            buffers_released: AtomicU64::new(0),
            last_usage: Mutex::new(None),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Sweep the target and release scratch buffers
    pub fn run_cycle(&self, forced: bool) -> usize {
        let reclaimed = self.target.reclaim();
        let released = self.buffers.reset();

        self.cycles.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.forced_cycles.fetch_add(1, Ordering::Relaxed);
        }
        self.entries_reclaimed
            .fetch_add(reclaimed as u64, Ordering::Relaxed);
        self.buffers_released
            .fetch_add(released as u64, Ordering::Relaxed);

        debug!(
            forced,
            entries_reclaimed = reclaimed,
            buffers_released = released,
            "🧠 MEMORY: Cycle complete"
        );
        reclaimed
    }

    /// Sample memory usage and wake the cycle when above the ceiling
    ///
    /// Samples closer together than `pressure_sample_interval` are skipped.
    /// Returns whether an out-of-cycle sweep was requested.
    pub fn check_pressure(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        {
            let mut last_sample = self.last_sample.lock();
            if let Some(at) = *last_sample {
                if at.elapsed() < self.config.pressure_sample_interval() {
                    return false;
                }
            }
            *last_sample = Some(Instant::now());
        }

        let Some(usage) = self.probe.current_usage() else {
            return false;
        };
        *self.last_usage.lock() = Some(usage);

        if usage <= self.config.max_memory_usage_bytes {
            return false;
        }

        self.pressure_events.fetch_add(1, Ordering::Relaxed);
        warn!(
            usage_bytes = usage,
            limit_bytes = self.config.max_memory_usage_bytes,
            "🧠 MEMORY: Usage above limit, requesting immediate sweep"
        );
        self.wake.notify_one();
        true
    }

    /// Start the periodic cycle; `None` when memory optimisation is disabled
    ///
    /// The loop exits when `stop` changes or its sender is dropped.
    pub fn spawn(self: &Arc<Self>, mut stop: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            return None;
        }
        let manager = Arc::clone(self);
        let interval = self.config.gc_interval();

        info!(interval_ms = interval.as_millis() as u64, "🧠 MEMORY: Cycle started");

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.run_cycle(false);
                    }
                    _ = manager.wake.notified() => {
                        manager.run_cycle(true);
                        ticker.reset();
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("🧠 MEMORY: Cycle stopped");
        }))
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            forced_cycles: self.forced_cycles.load(Ordering::Relaxed),
            pressure_events: self.pressure_events.load(Ordering::Relaxed),
            entries_reclaimed: self.entries_reclaimed.load(Ordering::Relaxed),
            buffers_released: self.buffers_released.load(Ordering::Relaxed),
            last_usage_bytes: *self.last_usage.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FixedProbe(u64);

    impl MemoryProbe for FixedProbe {
        fn current_usage(&self) -> Option<u64> {
            Some(self.0)
        }
    }

    #[derive(Default)]
    struct CountingTarget {
        sweeps: AtomicUsize,
    }

    impl Reclaimable for CountingTarget {
        fn reclaim(&self) -> usize {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            2
        }
    }

    fn config(max_bytes: u64) -> MemoryOptimizationConfig {
        MemoryOptimizationConfig {
            enabled: true,
            gc_interval_ms: 60_000,
            max_memory_usage_bytes: max_bytes,
            pressure_sample_interval_ms: 0,
        }
    }

    #[test]
    fn test_cycle_sweeps_and_resets_buffers() {
        let target = Arc::new(CountingTarget::default());
        let buffers = Arc::new(BufferPool::default());
        buffers.with_buffer(|buf| buf.push(1));

        let manager = MemoryManager::new(config(u64::MAX), target.clone(), buffers.clone());
        assert_eq!(manager.run_cycle(false), 2);

        assert_eq!(buffers.pooled(), 0);
        let stats = manager.stats();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.entries_reclaimed, 2);
        assert_eq!(stats.buffers_released, 1);
    }

    #[test]
    fn test_pressure_below_limit_is_ignored() {
        let manager = MemoryManager::new(
            config(1_000),
            Arc::new(CountingTarget::default()),
            Arc::new(BufferPool::default()),
        )
        .with_probe(Arc::new(FixedProbe(500)));

        assert!(!manager.check_pressure());
        assert_eq!(manager.stats().last_usage_bytes, Some(500));
    }

    #[test]
    fn test_pressure_sampling_is_rate_limited() {
        let mut limited = config(1_000);
        limited.pressure_sample_interval_ms = 60_000;
        let manager = MemoryManager::new(
            limited,
            Arc::new(CountingTarget::default()),
            Arc::new(BufferPool::default()),
        )
        .with_probe(Arc::new(FixedProbe(5_000)));

        assert!(manager.check_pressure());
        assert!(!manager.check_pressure());
        assert_eq!(manager.stats().pressure_events, 1);
    }

    #[tokio::test]
    async fn test_pressure_triggers_out_of_cycle_sweep() {
        let target = Arc::new(CountingTarget::default());
        let manager = Arc::new(
            MemoryManager::new(config(1_000), target.clone(), Arc::new(BufferPool::default()))
                .with_probe(Arc::new(FixedProbe(5_000))),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = manager.spawn(stop_rx).unwrap();

        assert!(manager.check_pressure());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(target.sweeps.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().forced_cycles, 1);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_disabled_manager_never_samples() {
        let mut disabled = config(0);
        disabled.enabled = false;
        let manager = Arc::new(
            MemoryManager::new(
                disabled,
                Arc::new(CountingTarget::default()),
                Arc::new(BufferPool::default()),
            )
            .with_probe(Arc::new(FixedProbe(5_000))),
        );
        assert!(!manager.check_pressure());
        let (_tx, rx) = watch::channel(false);
        assert!(manager.spawn(rx).is_none());
    }
}
