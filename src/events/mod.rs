//! # Engine Events
//!
//! Typed notifications emitted by the cache tiers, the hash ring and the task
//! executor. Consumers (logging, monitoring) subscribe to an [`EventPublisher`]
//! and match on [`EngineEvent`] instead of dispatching on event-name strings.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishedEvent};
pub use types::{CacheEvent, EngineEvent, EvictionReason, RingEvent, TaskEvent};
