//! # Roomwire
//!
//! Event gateway for venue automation: escape-room controllers publish
//! telemetry over MQTT, Roomwire turns it into canonical domain events on a
//! Redis bus and pushes those events live to WebSocket dashboards.
//!
//! ## Modules
//!
//! - [`topic`]: MQTT topic grammar, both directions
//! - [`normalize`]: Raw payloads to domain events
//! - [`domain`]: The domain event model and liveness rules
//! - [`bus`]: Pub/sub transports, channel fan-out and dispatch
//! - [`gateway`]: The MQTT ingestion service
//! - [`realtime`]: The WebSocket broadcast service
//! - [`api`]: HTTP surface of the broadcast service
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roomwire::bus::{EventPublisher, MemoryBus};
//! use roomwire::normalize::{decode, Normalizer};
//! use roomwire::topic::{route_topic, RoutedTopic};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let topic = "paragon/clockwork/status/ctrl_1/heartbeat";
//!     let RoutedTopic::Operational(coord) = route_topic(topic)? else {
//!         return Ok(());
//!     };
//!
//!     let payload = decode(&coord, br#"{"uptime": 42}"#)?;
//!     let events = Normalizer::default().normalize(&coord, payload, None, topic, chrono::Utc::now());
//!
//!     let publisher = EventPublisher::new(Arc::new(MemoryBus::default()));
//!     for event in &events {
//!         publisher.publish(event).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bus;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod logging;
pub mod normalize;
pub mod realtime;
pub mod topic;
