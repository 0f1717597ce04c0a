//! # Engine Errors
//!
//! Crate-level error type. Module errors (`PoolError`, `CacheBackendError`,
//! `HashRingError`, `ConfigurationError`) convert into [`EngineError`] so callers
//! composing several components can use a single `?`.
//!
//! Expected execution failures do not travel through this type: the executor
//! converts them into a failed [`TaskResult`](crate::execution::TaskResult)
//! carrying a classified [`TaskError`](crate::execution::TaskError).

use crate::cache::{CacheBackendError, HashRingError};
use crate::config::ConfigurationError;
use crate::pool::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Cache backend error: {0}")]
    CacheBackend(#[from] CacheBackendError),

    #[error("Hash ring error: {0}")]
    HashRing(#[from] HashRingError),

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
