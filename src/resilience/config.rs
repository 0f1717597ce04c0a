use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds for one circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether backend calls go through the breaker at all
    pub enabled: bool,

    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting trial calls
    pub timeout_ms: u64,

    /// Successful trial calls needed to close the circuit again
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            timeout_ms: 30_000,
            success_threshold: 2,
        }
    }
}
