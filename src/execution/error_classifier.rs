//! # Execution Error Classification
//!
//! Turns every way a task can fail into a structured [`TaskError`] that tells
//! the caller whether trying again makes sense.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌────────────────────┐
//! │ ExecutionFailure │────▶│ ErrorClassifier │────▶│ ErrorClassification│──▶ TaskError
//! │ + ErrorContext   │     │ Strategy        │     │ (+ retry delay)    │
//! └──────────────────┘     └─────────────────┘     └────────────────────┘
//! ```
//!
//! ## Taxonomy
//!
//! | Category             | recoverable | retryable |
//! |----------------------|-------------|-----------|
//! | `TransientNetwork`   | yes         | yes       |
//! | `RateLimit`          | yes         | yes       |
//! | `ServerFault`        | yes         | yes       |
//! | `ClientFault`        | no          | no        |
//! | `ResourceExhaustion` | yes         | yes (not while draining) |
//! | `CacheBackend`       | yes         | no        |
//! | `DeadlineExceeded`   | no          | no        |
//! | `CircuitOpen`        | yes         | yes       |
//! | `Unknown`            | yes         | no        |
//!
//! Cache backend failures are absorbed by the cache and never reach a task
//! result; the category exists so the taxonomy is complete for consumers.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use tasklane::execution::{
//!     BackendError, ErrorClassifier, ErrorContext, ExecutionFailure, StandardErrorClassifier,
//! };
//! use uuid::Uuid;
//!
//! let classifier = StandardErrorClassifier::new();
//! let context = ErrorContext {
//!     task_id: Uuid::new_v4(),
//!     kind: "completion".to_string(),
//!     executor: "mock".to_string(),
//!     attempt_number: 1,
//!     max_attempts: 3,
//!     execution_duration: Duration::from_millis(120),
//! };
//!
//! let failure = ExecutionFailure::Backend(BackendError::network("ECONNRESET"));
//! let classification = classifier.classify(&failure, &context);
//! assert!(classification.recoverable && classification.retryable);
//! assert!(classification.should_retry);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::backend::BackendError;
use super::task::TaskState;
use crate::config::RetryConfig;
use crate::pool::PoolError;

/// System error codes treated as transient connection failures
pub const NETWORK_ERROR_CODES: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
    "ECONNABORTED",
    "ENETUNREACH",
    "EHOSTUNREACH",
];

const RATE_LIMIT_CODES: &[&str] = &["rate_limit_exceeded", "rate_limited", "too_many_requests"];

/// Everything that can stop a task from producing a result
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionFailure {
    /// The external service or its transport failed
    Backend(BackendError),
    /// No handle could be borrowed
    Pool(PoolError),
    /// The task's deadline passed in the given state
    DeadlineExceeded { state: TaskState, timeout: Duration },
    /// The circuit breaker refused the call
    CircuitOpen { retry_after: Duration },
    /// The executor stopped admitting tasks
    ShuttingDown,
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionFailure::Backend(error) => write!(f, "{error}"),
            ExecutionFailure::Pool(error) => write!(f, "{error}"),
            ExecutionFailure::DeadlineExceeded { state, timeout } => {
                write!(f, "Deadline of {}ms exceeded while {state}", timeout.as_millis())
            }
            ExecutionFailure::CircuitOpen { retry_after } => {
                write!(f, "Circuit open, retry after {}ms", retry_after.as_millis())
            }
            ExecutionFailure::ShuttingDown => write!(f, "Executor is shutting down"),
        }
    }
}

/// Context information for error classification
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub task_id: Uuid,
    pub kind: String,
    /// Backend name
    pub executor: String,
    /// 1-based attempt that just failed
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub execution_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection reset, timeout or DNS failure
    TransientNetwork,
    /// The service is saturated, back off
    RateLimit,
    /// 5xx-class failure on the service side
    ServerFault,
    /// Caller error, will fail the same way again
    ClientFault,
    /// No pool handle within bound
    ResourceExhaustion,
    CacheBackend,
    DeadlineExceeded,
    CircuitOpen,
    Unknown,
}

impl ErrorCategory {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorCategory::ClientFault | ErrorCategory::DeadlineExceeded)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::TransientNetwork
                | ErrorCategory::RateLimit
                | ErrorCategory::ServerFault
                | ErrorCategory::ResourceExhaustion
                | ErrorCategory::CircuitOpen
        )
    }

    fn default_code(&self) -> &'static str {
        match self {
            ErrorCategory::TransientNetwork => "TRANSIENT_NETWORK",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::ServerFault => "SERVER_FAULT",
            ErrorCategory::ClientFault => "CLIENT_FAULT",
            ErrorCategory::ResourceExhaustion => "RESOURCE_EXHAUSTION",
            ErrorCategory::CacheBackend => "CACHE_BACKEND",
            ErrorCategory::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCategory::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCategory::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::TransientNetwork => write!(f, "Transient Network"),
            ErrorCategory::RateLimit => write!(f, "Rate Limit"),
            ErrorCategory::ServerFault => write!(f, "Server Fault"),
            ErrorCategory::ClientFault => write!(f, "Client Fault"),
            ErrorCategory::ResourceExhaustion => write!(f, "Resource Exhaustion"),
            ErrorCategory::CacheBackend => write!(f, "Cache Backend"),
            ErrorCategory::DeadlineExceeded => write!(f, "Deadline Exceeded"),
            ErrorCategory::CircuitOpen => write!(f, "Circuit Open"),
            ErrorCategory::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Structured failure attached to a failed [`TaskResult`](super::TaskResult)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub error_type: ErrorCategory,
    pub code: Option<String>,
    pub message: String,
    pub context: BTreeMap<String, serde_json::Value>,
    pub recoverable: bool,
    pub retryable: bool,
    /// Suggested wait before resubmitting
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub recoverable: bool,
    /// Whether this kind of failure can succeed on another attempt
    pub retryable: bool,
    /// Retryable and attempts remain
    pub should_retry: bool,
    /// Delay before the next attempt, set when `should_retry`
    pub retry_delay: Option<Duration>,
    pub code: String,
    pub message: String,
    pub is_final_attempt: bool,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl From<ErrorClassification> for TaskError {
    fn from(classification: ErrorClassification) -> Self {
        let retry_after = classification.retry_delay.or_else(|| {
            classification
                .metadata
                .get("retry_after_ms")
                .and_then(serde_json::Value::as_u64)
                .map(Duration::from_millis)
        });
        Self {
            error_type: classification.category,
            code: Some(classification.code),
            message: classification.message,
            context: classification.metadata,
            recoverable: classification.recoverable,
            retryable: classification.retryable,
            retry_after,
        }
    }
}

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, failure: &ExecutionFailure, context: &ErrorContext) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

/// Configuration for error classification behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorClassifierConfig {
    /// Base retry delay for exponential backoff
    pub base_retry_delay: Duration,

    /// Every computed delay is capped here
    pub max_retry_delay: Duration,

    pub backoff_multiplier: f64,

    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,

    /// Delay used when a rate-limited response names none
    pub rate_limit_delay: Duration,

    pub resource_exhaustion_delay: Duration,
}

impl Default for ErrorClassifierConfig {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for ErrorClassifierConfig {
    fn from(retry: &RetryConfig) -> Self {
        Self {
            base_retry_delay: retry.base_delay(),
            max_retry_delay: retry.max_delay(),
            backoff_multiplier: retry.backoff_multiplier,
            jitter_factor: retry.jitter_factor.clamp(0.0, 1.0),
            rate_limit_delay: Duration::from_secs(5),
            resource_exhaustion_delay: Duration::from_secs(1),
        }
    }
}

/// Standard error classifier with the taxonomy above
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier {
    config: ErrorClassifierConfig,
}

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ErrorClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ErrorClassifierConfig {
        &self.config
    }

    /// Exponential backoff with jitter for the given 1-based attempt
    pub fn retry_delay(&self, attempt_number: u32) -> Duration {
        self.calculate_exponential_backoff(attempt_number)
    }

    fn calculate_exponential_backoff(&self, attempt_number: u32) -> Duration {
        let max_retry_delay = self.config.max_retry_delay;
        let exponent = attempt_number.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut seconds = self.config.base_retry_delay.as_secs_f64()
            * self.config.backoff_multiplier.powi(exponent);

        if self.config.jitter_factor > 0.0 {
            seconds *= 1.0 + fastrand::f64() * self.config.jitter_factor;
        }

        // NaN, negative and overflowing products all land on the cap
        if !seconds.is_finite() || seconds < 0.0 {
            return max_retry_delay;
        }
        let seconds = seconds.min(max_retry_delay.as_secs_f64());
        Duration::try_from_secs_f64(seconds).unwrap_or(max_retry_delay)
    }

    fn classify_backend_error(
        &self,
        error: &BackendError,
        context: &ErrorContext,
    ) -> ErrorClassification {
        let code = error.code.as_deref();
        let category = if code.is_some_and(is_network_code) {
            ErrorCategory::TransientNetwork
        } else if error.status == Some(429) || code.is_some_and(is_rate_limit_code) {
            ErrorCategory::RateLimit
        } else {
            match error.status {
                Some(500..=599) => ErrorCategory::ServerFault,
                Some(400..=499) => ErrorCategory::ClientFault,
                _ => ErrorCategory::Unknown,
            }
        };

        let mut metadata = BTreeMap::new();
        if let Some(status) = error.status {
            metadata.insert("status".to_string(), serde_json::json!(status));
        }
        if let Some(retry_after) = error.retry_after {
            metadata.insert(
                "retry_after_ms".to_string(),
                serde_json::json!(retry_after.as_millis() as u64),
            );
        }

        let code = error
            .code
            .clone()
            .unwrap_or_else(|| category.default_code().to_string());
        let server_delay = match category {
            ErrorCategory::RateLimit => Some(
                error
                    .retry_after
                    .unwrap_or(self.config.rate_limit_delay)
                    .min(self.config.max_retry_delay),
            ),
            _ => None,
        };

        self.build(
            category,
            category.is_retryable(),
            code,
            error.message.clone(),
            server_delay,
            metadata,
            context,
        )
    }

    fn classify_pool_error(&self, error: &PoolError, context: &ErrorContext) -> ErrorClassification {
        let (code, retryable) = match error {
            PoolError::AcquireTimeout(_) => ("POOL_ACQUIRE_TIMEOUT", true),
            PoolError::CreationFailed(_) => ("POOL_CREATION_FAILED", true),
            PoolError::Draining => ("POOL_DRAINING", false),
        };
        self.build(
            ErrorCategory::ResourceExhaustion,
            retryable,
            code.to_string(),
            error.to_string(),
            Some(
                self.config
                    .resource_exhaustion_delay
                    .min(self.config.max_retry_delay),
            ),
            BTreeMap::new(),
            context,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        category: ErrorCategory,
        retryable: bool,
        code: String,
        message: String,
        fixed_delay: Option<Duration>,
        mut metadata: BTreeMap<String, serde_json::Value>,
        context: &ErrorContext,
    ) -> ErrorClassification {
        let is_final_attempt = context.attempt_number >= context.max_attempts;
        let should_retry = retryable && !is_final_attempt;
        let retry_delay = should_retry.then(|| {
            fixed_delay.unwrap_or_else(|| self.calculate_exponential_backoff(context.attempt_number))
        });

        metadata.insert("kind".to_string(), serde_json::json!(context.kind));
        metadata.insert("attempt".to_string(), serde_json::json!(context.attempt_number));
        metadata.insert(
            "execution_duration_ms".to_string(),
            serde_json::json!(context.execution_duration.as_millis() as u64),
        );

        if retryable && !should_retry {
            // Out of attempts: still tell the caller how long to wait before resubmitting
            let wait = fixed_delay
                .unwrap_or_else(|| self.calculate_exponential_backoff(context.attempt_number));
            metadata.insert(
                "retry_after_ms".to_string(),
                serde_json::json!(wait.as_millis() as u64),
            );
        }

        ErrorClassification {
            category,
            recoverable: category.is_recoverable(),
            retryable,
            should_retry,
            retry_delay,
            code,
            message,
            is_final_attempt,
            metadata,
        }
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify(&self, failure: &ExecutionFailure, context: &ErrorContext) -> ErrorClassification {
        match failure {
            ExecutionFailure::Backend(error) => self.classify_backend_error(error, context),
            ExecutionFailure::Pool(error) => self.classify_pool_error(error, context),
            ExecutionFailure::DeadlineExceeded { state, timeout } => {
                let metadata = BTreeMap::from([(
                    "state".to_string(),
                    serde_json::json!(state.to_string()),
                )]);
                self.build(
                    ErrorCategory::DeadlineExceeded,
                    false,
                    ErrorCategory::DeadlineExceeded.default_code().to_string(),
                    format!(
                        "Task '{}' exceeded its {}ms deadline while {}",
                        context.kind,
                        timeout.as_millis(),
                        state
                    ),
                    None,
                    metadata,
                    context,
                )
            }
            ExecutionFailure::CircuitOpen { retry_after } => self.build(
                ErrorCategory::CircuitOpen,
                true,
                ErrorCategory::CircuitOpen.default_code().to_string(),
                failure.to_string(),
                Some(*retry_after),
                BTreeMap::new(),
                context,
            ),
            ExecutionFailure::ShuttingDown => self.build(
                ErrorCategory::ResourceExhaustion,
                false,
                "EXECUTOR_SHUTTING_DOWN".to_string(),
                failure.to_string(),
                None,
                BTreeMap::new(),
                context,
            ),
        }
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}

fn is_network_code(code: &str) -> bool {
    NETWORK_ERROR_CODES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(code))
}

fn is_rate_limit_code(code: &str) -> bool {
    RATE_LIMIT_CODES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_context() -> ErrorContext {
        ErrorContext {
            task_id: Uuid::new_v4(),
            kind: "completion".to_string(),
            executor: "mock".to_string(),
            attempt_number: 1,
            max_attempts: 3,
            execution_duration: Duration::from_millis(50),
        }
    }

    fn classify(failure: ExecutionFailure) -> ErrorClassification {
        StandardErrorClassifier::new().classify(&failure, &create_test_context())
    }

    #[test]
    fn test_network_codes_are_transient() {
        for code in NETWORK_ERROR_CODES {
            let classification = classify(ExecutionFailure::Backend(BackendError::network(*code)));
            assert_eq!(classification.category, ErrorCategory::TransientNetwork);
            assert!(classification.recoverable);
            assert!(classification.retryable);
            assert!(classification.should_retry);
            assert!(classification.retry_delay.is_some());
        }
    }

    #[test]
    fn test_client_fault_is_permanent() {
        let classification =
            classify(ExecutionFailure::Backend(BackendError::http(400, "bad request")));
        assert_eq!(classification.category, ErrorCategory::ClientFault);
        assert!(!classification.recoverable);
        assert!(!classification.retryable);
        assert!(classification.retry_delay.is_none());
    }

    #[test]
    fn test_rate_limit_honours_server_delay() {
        let classification = classify(ExecutionFailure::Backend(BackendError::rate_limited(Some(
            Duration::from_millis(40),
        ))));
        assert_eq!(classification.category, ErrorCategory::RateLimit);
        assert_eq!(classification.retry_delay, Some(Duration::from_millis(40)));

        let by_code = classify(ExecutionFailure::Backend(
            BackendError::other("slow down").with_code("RATE_LIMITED"),
        ));
        assert_eq!(by_code.category, ErrorCategory::RateLimit);
    }

    #[test]
    fn test_server_fault_and_unknown() {
        let server = classify(ExecutionFailure::Backend(BackendError::http(503, "unavailable")));
        assert_eq!(server.category, ErrorCategory::ServerFault);
        assert!(server.retryable);

        let unknown = classify(ExecutionFailure::Backend(BackendError::other("weird")));
        assert_eq!(unknown.category, ErrorCategory::Unknown);
        assert!(unknown.recoverable);
        assert!(!unknown.retryable);
    }

    #[test]
    fn test_pool_failures() {
        let timeout = classify(ExecutionFailure::Pool(PoolError::AcquireTimeout(
            Duration::from_millis(10),
        )));
        assert_eq!(timeout.category, ErrorCategory::ResourceExhaustion);
        assert!(timeout.recoverable && timeout.retryable);

        let draining = classify(ExecutionFailure::Pool(PoolError::Draining));
        assert_eq!(draining.category, ErrorCategory::ResourceExhaustion);
        assert!(draining.recoverable);
        assert!(!draining.retryable);
    }

    #[test]
    fn test_deadline_and_circuit() {
        let deadline = classify(ExecutionFailure::DeadlineExceeded {
            state: TaskState::Queued,
            timeout: Duration::from_millis(20),
        });
        assert_eq!(deadline.category, ErrorCategory::DeadlineExceeded);
        assert!(!deadline.recoverable && !deadline.retryable);
        assert_eq!(deadline.metadata["state"], "queued");

        let circuit = classify(ExecutionFailure::CircuitOpen {
            retry_after: Duration::from_millis(300),
        });
        assert_eq!(circuit.category, ErrorCategory::CircuitOpen);
        assert_eq!(circuit.retry_delay, Some(Duration::from_millis(300)));
    }

    #[test]
    fn test_final_attempt_handling() {
        let classifier = StandardErrorClassifier::new();
        let context = ErrorContext {
            attempt_number: 3,
            ..create_test_context()
        };
        let classification = classifier.classify(
            &ExecutionFailure::Backend(BackendError::network("ECONNRESET")),
            &context,
        );
        assert!(classification.is_final_attempt);
        assert!(classification.retryable);
        assert!(!classification.should_retry);
        assert!(classification.retry_delay.is_none());

        let error = TaskError::from(classification);
        assert!(error.recoverable && error.retryable);
        assert_eq!(error.code.as_deref(), Some("ECONNRESET"));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let classifier = StandardErrorClassifier::with_config(ErrorClassifierConfig {
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..Default::default()
        });
        assert_eq!(classifier.retry_delay(1), Duration::from_millis(100));
        assert_eq!(classifier.retry_delay(2), Duration::from_millis(200));
        assert_eq!(classifier.retry_delay(3), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_saturates_at_high_attempts() {
        let classifier = StandardErrorClassifier::new();
        let cap = classifier.config().max_retry_delay;
        assert_eq!(classifier.retry_delay(80), cap);
        assert_eq!(classifier.retry_delay(5_000), cap);
        assert_eq!(classifier.retry_delay(u32::MAX), cap);
    }

    #[test]
    fn test_backoff_with_unvalidated_multiplier_stays_bounded() {
        for multiplier in [-2.0, f64::NAN, f64::INFINITY] {
            let classifier = StandardErrorClassifier::with_config(ErrorClassifierConfig {
                base_retry_delay: Duration::from_millis(100),
                max_retry_delay: Duration::from_secs(5),
                backoff_multiplier: multiplier,
                jitter_factor: 0.2,
                ..Default::default()
            });
            for attempt in 1..=4 {
                assert!(classifier.retry_delay(attempt) <= Duration::from_secs(5));
            }
        }
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let classifier = StandardErrorClassifier::with_config(ErrorClassifierConfig {
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(10),
            backoff_multiplier: 1.0,
            jitter_factor: 0.5,
            ..Default::default()
        });
        for _ in 0..50 {
            let delay = classifier.retry_delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
