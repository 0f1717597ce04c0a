//! # Resilience Module
//!
//! Circuit breaking in front of the execution backend. When the backend keeps
//! failing with server-side or network errors, the executor stops spending
//! pool handles on it and fails tasks fast as `CircuitOpen` until the breaker
//! admits trial calls again.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasklane::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     enabled: true,
//!     failure_threshold: 5,
//!     timeout_ms: 30_000,
//!     success_threshold: 2,
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("completion_api", config);
//!
//! let result = circuit_breaker.call(|| async {
//!     Ok::<&str, std::io::Error>("success")
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
