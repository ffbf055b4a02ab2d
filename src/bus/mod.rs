//! Event Bus
//!
//! Pub/sub plumbing shared by the gateway and the realtime server.
//!
//! - **channels**: Channel names shared with every service on the bus
//! - **transport**: The transport trait and its error type
//! - **redis_bus**: Redis pub/sub transport
//! - **memory**: In-process transport
//! - **publisher**: Domain event fan-out to global/room/session channels
//! - **dispatcher**: Multi-handler channel subscriptions

pub mod channels;
pub mod dispatcher;
pub mod memory;
pub mod publisher;
pub mod redis_bus;
pub mod transport;

pub use channels::Channel;
pub use dispatcher::{Dispatcher, HandlerResult, SubscriptionHandle};
pub use memory::MemoryBus;
pub use publisher::EventPublisher;
pub use redis_bus::RedisBus;
pub use transport::{BusError, BusTransport, Result};

use std::sync::Arc;

use crate::config::{BusBackend, BusConfig};

/// Open the transport selected by configuration
pub async fn connect(config: &BusConfig) -> Result<Arc<dyn BusTransport>> {
    match config.backend {
        BusBackend::Redis => Ok(Arc::new(
            RedisBus::connect(&config.url, config.listener_capacity).await?,
        )),
        BusBackend::Memory => Ok(Arc::new(MemoryBus::new(config.listener_capacity))),
    }
}
