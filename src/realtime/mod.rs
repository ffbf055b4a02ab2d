//! Realtime Broadcast Server
//!
//! Pushes domain events from the bus to dashboard WebSocket clients.
//!
//! - **hub**: Client registry, room membership and broadcasting
//! - **handler**: WebSocket upgrade and per-connection loops
//! - **messages**: Client control messages and server notices
//!
//! Clients connect to `/ws` and join rooms by channel name:
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:3002/ws');
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({action: 'subscribe', channels: ['gm:room:clockwork'], message_id: '1'}));
//! };
//! ```
//!
//! Every event reaches every client; members of the event's room get an
//! extra room-scoped copy.

mod handler;
mod hub;
mod messages;

pub use handler::websocket_handler;
pub use hub::{extract_room_id, ClientHub, ClientId, Delivery, HubConfig, HubError, HubStats};
pub use messages::{ClientMessage, Notice, Reply, ServerMessage};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::{self, ApiError, AppState};
use crate::bus::{self, BusTransport, Channel, Dispatcher, SubscriptionHandle};
use crate::config::RealtimeConfig;
use crate::domain::DomainEvent;

/// Deliver every event on the global domain-events channel to the hub
pub async fn forward_domain_events(
    dispatcher: &Dispatcher<DomainEvent>,
    hub: Arc<ClientHub>,
) -> bus::Result<SubscriptionHandle> {
    dispatcher
        .subscribe(&Channel::DomainEvents.name(), move |event: Arc<DomainEvent>| {
            let hub = hub.clone();
            async move {
                if event.is_acknowledgement() {
                    info!(
                        event_id = %event.event_id,
                        device_id = event.device_id().unwrap_or("-"),
                        room_id = event.room_id().unwrap_or("-"),
                        "Broadcasting acknowledgement"
                    );
                }

                let delivery = hub.deliver(&event).await;
                debug!(
                    event_type = %event.event_type(),
                    event_id = %event.event_id,
                    room_clients = delivery.room,
                    clients = delivery.global,
                    "Delivered domain event"
                );
                Ok(())
            }
        })
        .await
}

/// Run the WebSocket and health server until `shutdown` resolves
///
/// Shutdown order: stop accepting connections, drop clients, then release
/// the bus.
pub async fn run(
    config: RealtimeConfig,
    bus: Arc<dyn BusTransport>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let hub = Arc::new(ClientHub::new(HubConfig {
        max_connections: config.max_connections,
    }));
    let dispatcher = Dispatcher::<DomainEvent>::new(bus.clone());

    forward_domain_events(&dispatcher, hub.clone()).await?;
    let stats = hub.spawn_stats_logger(Duration::from_secs(config.stats_interval_secs.max(1)));

    let state = AppState::new(hub.clone(), bus.clone(), config);
    let served = api::serve(state, shutdown).await;

    stats.abort();
    hub.close().await;
    dispatcher.close().await;
    bus.close().await;
    info!("Realtime server stopped");

    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::domain::{Attributes, EventKind, EventMetadata, EventScope};
    use chrono::Utc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_bus_events_reach_clients() {
        let bus = Arc::new(MemoryBus::default());
        let hub = Arc::new(ClientHub::new(HubConfig::default()));
        let dispatcher = Dispatcher::<DomainEvent>::new(bus.clone());
        forward_domain_events(&dispatcher, hub.clone()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();
        hub.subscribe(&id, &["gm:room:r1".to_string()]).await.unwrap();

        let event = DomainEvent::new(
            EventKind::HintUsed(Attributes::default()),
            EventScope {
                room_id: Some("r1".to_string()),
                ..Default::default()
            },
            Utc::now(),
            EventMetadata::default(),
        );
        bus.publish(&Channel::DomainEvents.name(), &serde_json::to_string(&event).unwrap())
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(first.contains("\"room_id\":\"r1\""));
        assert!(second.contains("hint_used"));
        dispatcher.close().await;
    }
}
