//! Event Publisher
//!
//! Fans one domain event out to the global channel and, when scoped, to the
//! room and session channels. There is no atomicity across channels.

use std::sync::Arc;
use tracing::{debug, error, instrument};

use super::channels::Channel;
use super::transport::{BusError, BusTransport, Result};
use crate::domain::DomainEvent;

/// Publishes domain events onto the bus
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn BusTransport>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn BusTransport>) -> Self {
        Self { bus }
    }

    /// Channels an event is published to, in publish order
    pub fn channels_for(event: &DomainEvent) -> Vec<Channel> {
        let mut channels = vec![Channel::DomainEvents];
        if let Some(room_id) = event.room_id() {
            channels.push(Channel::room(room_id));
        }
        if let Some(session_id) = event.session_id() {
            channels.push(Channel::session(session_id));
        }
        channels
    }

    /// Publish an event to every channel it belongs on
    ///
    /// Serializes once. Every channel is attempted even if an earlier one
    /// fails; the first failure is returned.
    #[instrument(skip_all, fields(event_id = %event.event_id, event_type = %event.event_type()))]
    pub async fn publish(&self, event: &DomainEvent) -> Result<usize> {
        let payload = serde_json::to_string(event)?;
        let mut published = 0;
        let mut first_error: Option<BusError> = None;

        for channel in Self::channels_for(event) {
            match self.bus.publish(&channel.name(), &payload).await {
                Ok(()) => published += 1,
                Err(e) => {
                    error!(channel = %channel, error = %e, "Failed to publish event");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(channels = published, "Event published");
                Ok(published)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::domain::{Attributes, EventKind, EventMetadata, EventScope};
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::{mpsc, Mutex};

    fn event(room_id: Option<&str>, session_id: Option<&str>) -> DomainEvent {
        DomainEvent::new(
            EventKind::PuzzleSolved(Attributes::default()),
            EventScope {
                room_id: room_id.map(str::to_string),
                session_id: session_id.map(str::to_string),
                ..Default::default()
            },
            Utc::now(),
            EventMetadata::default(),
        )
    }

    #[tokio::test]
    async fn test_publish_order_global_room_session() {
        let bus = Arc::new(MemoryBus::recording());
        let publisher = EventPublisher::new(bus.clone());

        let count = publisher.publish(&event(Some("r1"), Some("s1"))).await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            bus.published_channels().await,
            vec![
                "sentient:events:domain",
                "sentient:events:room:r1",
                "sentient:events:session:s1",
            ]
        );
    }

    #[tokio::test]
    async fn test_unscoped_event_goes_global_only() {
        let bus = Arc::new(MemoryBus::recording());
        let publisher = EventPublisher::new(bus.clone());

        publisher.publish(&event(None, None)).await.unwrap();

        assert_eq!(bus.published_channels().await, vec!["sentient:events:domain"]);
    }

    #[tokio::test]
    async fn test_same_payload_on_every_channel() {
        let bus = Arc::new(MemoryBus::recording());
        let publisher = EventPublisher::new(bus.clone());
        let e = event(Some("r1"), None);

        publisher.publish(&e).await.unwrap();

        let published = bus.published().await;
        assert_eq!(published[0].1, published[1].1);
        let decoded: DomainEvent = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(decoded.event_id, e.event_id);
    }

    /// Fails publishes on one channel, records the rest
    struct FlakyBus {
        failing: String,
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BusTransport for FlakyBus {
        async fn publish(&self, channel: &str, _payload: &str) -> Result<()> {
            self.attempts.lock().await.push(channel.to_string());
            if channel == self.failing {
                Err(BusError::Closed)
            } else {
                Ok(())
            }
        }

        async fn listen(&self, _channel: &str) -> Result<mpsc::Receiver<String>> {
            Err(BusError::Closed)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_failure_does_not_skip_remaining_channels() {
        let bus = Arc::new(FlakyBus {
            failing: "sentient:events:domain".to_string(),
            attempts: Mutex::new(Vec::new()),
        });
        let publisher = EventPublisher::new(bus.clone());

        let result = publisher.publish(&event(Some("r1"), Some("s1"))).await;

        assert!(matches!(result, Err(BusError::Closed)));
        assert_eq!(bus.attempts.lock().await.len(), 3);
    }
}
