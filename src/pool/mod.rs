//! # Resource Pool
//!
//! Bounded pool of reusable handles guarding a scarce external resource
//! (API clients, connections, sessions). The pool is the single point of
//! mutual exclusion over that resource: every call to the execution backend
//! happens while a [`PoolGuard`] is held.
//!
//! ## Handle lifecycle
//!
//! - **Idle**: open and parked in the pool's idle set
//! - **Borrowed**: lent to exactly one caller through a [`PoolGuard`]
//! - **Closed**: retired through [`ResourceFactory::destroy`] by adaptive
//!   shrinking, validation failure or [`ResourcePool::drain`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tasklane::config::PoolConfig;
//! use tasklane::pool::{PoolError, ResourceFactory, ResourcePool};
//!
//! struct ClientFactory;
//!
//! #[async_trait]
//! impl ResourceFactory<String> for ClientFactory {
//!     async fn create(&self) -> Result<String, PoolError> {
//!         Ok("client".to_string())
//!     }
//! }
//!
//! # async fn example() -> Result<(), PoolError> {
//! let pool = ResourcePool::new(Arc::new(ClientFactory), PoolConfig::default()).await?;
//! let length = pool.execute(|client| async move { client.len() }).await?;
//! pool.drain().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod factory;
mod resource_pool;

pub use error::PoolError;
pub use factory::ResourceFactory;
pub use resource_pool::{PoolGuard, PoolStats, ResourcePool};
