use tokio::sync::broadcast;

use super::types::EngineEvent;
use crate::constants::EVENT_CHANNEL_CAPACITY;

/// High-throughput publisher for engine notifications
///
/// Cloning shares the underlying channel, so every component of one engine
/// instance publishes into the same stream.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: EngineEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber
    ///
    /// Publishing with no subscribers is not an error: events are dropped.
    pub fn publish(&self, event: impl Into<EngineEvent>) {
        let event = PublishedEvent {
            event: event.into(),
            published_at: chrono::Utc::now(),
        };

        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers, notification dropped");
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTier;
    use crate::events::CacheEvent;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(CacheEvent::Set {
            tier: CacheTier::Hot,
            key: "k".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();

        publisher.publish(CacheEvent::Hit {
            tier: CacheTier::Hot,
            key: "answer".to_string(),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.name(), "hit");
    }
}
