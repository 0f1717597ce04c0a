//! # Execution Backend
//!
//! The call to the scarce external service. The executor borrows a handle
//! from the [`ResourcePool`](crate::pool::ResourcePool) and passes it to
//! [`ExecutionBackend::invoke`]; the wire protocol behind that call belongs to
//! the backend implementation.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::task::{ResourceUsage, Task};

/// Raw successful response from the external service
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackendResponse {
    pub output: String,
    pub usage: ResourceUsage,
}

impl BackendResponse {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            usage: ResourceUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Failure reported by the external service or the transport in front of it
///
/// `code` carries system-level error codes (`ECONNRESET`, `ETIMEDOUT`, ...) or
/// service codes (`rate_limit_exceeded`); `status` carries an HTTP-class status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub code: Option<String>,
    pub status: Option<u16>,
    pub message: String,
    /// Server-specified delay before the next attempt
    pub retry_after: Option<Duration>,
}

impl BackendError {
    /// Connection-level failure identified by a system error code
    pub fn network(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            message: format!("Network error: {code}"),
            code: Some(code),
            status: None,
            retry_after: None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            code: Some("rate_limit_exceeded".to_string()),
            status: Some(429),
            message: "Rate limit exceeded".to_string(),
            retry_after,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether the failure says something about the health of the service
    ///
    /// Caller mistakes (4xx other than 429) leave the circuit breaker alone.
    pub fn indicates_service_fault(&self) -> bool {
        match self.status {
            Some(429) => false,
            Some(status) if (400..500).contains(&status) => false,
            _ => true,
        }
    }
}

/// The external call guarded by the pool
///
/// `R` is the pooled handle type (client, session, connection).
#[async_trait]
pub trait ExecutionBackend<R>: Send + Sync
where
    R: Send + Sync + 'static,
{
    /// Identity recorded as `executor` on every [`TaskResult`](super::TaskResult)
    fn name(&self) -> &str;

    async fn invoke(&self, task: &Task, resource: Arc<R>) -> Result<BackendResponse, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let err = BackendError::network("ECONNRESET");
        assert_eq!(err.code.as_deref(), Some("ECONNRESET"));
        assert_eq!(err.to_string(), "Network error: ECONNRESET");

        let err = BackendError::rate_limited(Some(Duration::from_secs(2)));
        assert_eq!(err.status, Some(429));
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_service_fault_detection() {
        assert!(BackendError::network("ETIMEDOUT").indicates_service_fault());
        assert!(BackendError::http(503, "unavailable").indicates_service_fault());
        assert!(BackendError::other("boom").indicates_service_fault());
        assert!(!BackendError::http(400, "bad request").indicates_service_fault());
        assert!(!BackendError::rate_limited(None).indicates_service_fault());
    }
}
