use std::time::Duration;

/// Errors returned to a caller borrowing from a [`ResourcePool`](super::ResourcePool)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Pool is draining")]
    Draining,

    #[error("Timed out after {0:?} waiting for a pool handle")]
    AcquireTimeout(Duration),

    #[error("Failed to create pool resource: {0}")]
    CreationFailed(String),
}

impl PoolError {
    pub fn creation_failed(reason: impl ToString) -> Self {
        Self::CreationFailed(reason.to_string())
    }
}
