//! # Circuit Breaker Implementation
//!
//! Fault isolation in front of the execution backend. Three states:
//! Closed (normal operation), Open (failing fast) and Half-Open (admitting a
//! limited number of trial calls to test recovery).
//!
//! Besides the closure-based [`CircuitBreaker::call`], the breaker exposes
//! [`try_acquire`](CircuitBreaker::try_acquire) plus explicit outcome recording
//! for callers that decide themselves which failures count against the
//! backend's health.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{CircuitBreakerConfig, CircuitBreakerMetrics};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to test system health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component} (retry in {retry_after:?})")]
    CircuitOpen {
        component: String,
        retry_after: Duration,
    },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Debug)]
struct BreakerState {
    metrics: CircuitBreakerMetrics,
    opened_at: Option<Instant>,
    /// Successful trial calls in the current half-open period
    trial_successes: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state, readable without taking the lock
    state: AtomicU8,

    config: CircuitBreakerConfig,

    /// Counters and the open timestamp, updated together
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout_ms,
            success_threshold = config.success_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(BreakerState {
                metrics: CircuitBreakerMetrics::new(),
                opened_at: None,
                trial_successes: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Every `Err` returned by the operation counts as a failure.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire()
            .map_err(|retry_after| CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_after,
            })?;

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration),
            Err(_) => self.record_failure(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Ask to run one call
    ///
    /// Returns the time left before the circuit admits trial calls when the
    /// call is refused. An admitted caller must report the outcome through
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure), or
    /// [`record_ignored`](Self::record_ignored) when the outcome says nothing
    /// about the protected component.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = inner
                    .opened_at
                    .map(|opened| self.config.timeout().saturating_sub(opened.elapsed()))
                    .unwrap_or(Duration::ZERO);
                if remaining.is_zero() {
                    self.transition_to_half_open(&mut inner);
                    inner.metrics.half_open_calls += 1;
                    Ok(())
                } else {
                    inner.metrics.rejected_count += 1;
                    Err(remaining)
                }
            }
            CircuitState::HalfOpen => {
                if inner.metrics.half_open_calls < u64::from(self.config.success_threshold) {
                    inner.metrics.half_open_calls += 1;
                    Ok(())
                } else {
                    inner.metrics.rejected_count += 1;
                    Err(Duration::ZERO)
                }
            }
        }
    }

    /// Time left before an open circuit admits trial calls
    pub fn retry_after(&self) -> Duration {
        let inner = self.inner.lock();
        match (self.state(), inner.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                self.config.timeout().saturating_sub(opened.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    pub fn record_success(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.total_duration += duration;

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🟢 Operation succeeded"
        );

        match self.state() {
            CircuitState::HalfOpen => {
                inner.metrics.consecutive_failures = 0;
                inner.trial_successes += 1;
                if inner.trial_successes >= u64::from(self.config.success_threshold) {
                    self.transition_to_closed(&mut inner);
                }
            }
            CircuitState::Closed => {
                inner.metrics.consecutive_failures = 0;
            }
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    pub fn record_failure(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.total_duration += duration;

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🔴 Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                inner.metrics.consecutive_failures += 1;
                if inner.metrics.consecutive_failures >= u64::from(self.config.failure_threshold) {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state immediately opens circuit
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Release an admitted call whose outcome does not reflect the component's health
    pub fn record_ignored(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        if self.state() == CircuitState::HalfOpen {
            inner.metrics.half_open_calls = inner.metrics.half_open_calls.saturating_sub(1);
        }
    }

    fn transition_to_closed(&self, inner: &mut BreakerState) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        inner.metrics.consecutive_failures = 0;
        inner.metrics.half_open_calls = 0;
        inner.trial_successes = 0;
        inner.opened_at = None;

        info!(
            component = %self.name,
            total_calls = inner.metrics.total_calls,
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self, inner: &mut BreakerState) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        inner.opened_at = Some(Instant::now());
        inner.metrics.half_open_calls = 0;
        inner.trial_successes = 0;

        error!(
            component = %self.name,
            consecutive_failures = inner.metrics.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            timeout_ms = self.config.timeout_ms,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self, inner: &mut BreakerState) {
        self.state.store(CircuitState::HalfOpen as u8, Ordering::Release);
        inner.metrics.half_open_calls = 0;
        inner.trial_successes = 0;

        info!(
            component = %self.name,
            success_threshold = self.config.success_threshold,
            "🟡 Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.transition_to_open(&mut inner);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let mut snapshot = inner.metrics.clone();
        snapshot.current_state = self.state();

        if snapshot.total_calls > 0 {
            snapshot.failure_rate = snapshot.failure_count as f64 / snapshot.total_calls as f64;
            snapshot.success_rate = snapshot.success_count as f64 / snapshot.total_calls as f64;
            snapshot.average_duration = snapshot.total_duration / snapshot.total_calls as u32;
        }

        snapshot
    }

    /// Closed with a failure rate below 10% (or too few calls to tell)
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let inner = self.inner.lock();
        if inner.metrics.total_calls < 10 {
            return true;
        }
        (inner.metrics.failure_count as f64 / inner.metrics.total_calls as f64) < 0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn config(failure_threshold: u32, timeout_ms: u64, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold,
            timeout_ms,
            success_threshold,
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = CircuitBreaker::new("backend", config(3, 100, 2));
        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
        assert!(circuit.is_healthy());
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_on_failures() {
        let circuit = CircuitBreaker::new("backend", config(2, 1_000, 2));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let result = circuit
            .call(|| async { Ok::<_, String>("should not execute") })
            .await;
        match result {
            Err(CircuitBreakerError::CircuitOpen { retry_after, .. }) => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(1));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
        assert_eq!(circuit.metrics().rejected_count, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_recovery() {
        let circuit = CircuitBreaker::new("backend", config(1, 50, 1));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(60)).await;

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let circuit = CircuitBreaker::new("backend", config(1, 20, 2));
        circuit.force_open();

        sleep(Duration::from_millis(30)).await;
        assert!(circuit.try_acquire().is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        circuit.record_failure(Duration::from_millis(1));
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.try_acquire().is_err());
    }

    #[tokio::test]
    async fn test_half_open_limits_trial_calls() {
        let circuit = CircuitBreaker::new("backend", config(1, 10, 2));
        circuit.force_open();
        sleep(Duration::from_millis(20)).await;

        assert!(circuit.try_acquire().is_ok());
        assert!(circuit.try_acquire().is_ok());
        assert!(circuit.try_acquire().is_err());

        circuit.record_success(Duration::from_millis(1));
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        circuit.record_success(Duration::from_millis(1));
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn test_force_operations() {
        let circuit = CircuitBreaker::new("backend", config(1, 1_000, 1));

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.retry_after() > Duration::ZERO);

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.retry_after(), Duration::ZERO);
    }
}
