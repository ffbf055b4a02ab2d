//! Per-message pipeline: route, decode, normalize, publish
//!
//! Every failure is handled here and reported as an [`Outcome`]; nothing
//! escapes to the ingestion loop.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::actions::ActionCatalog;
use super::client::Registrar;
use crate::bus::EventPublisher;
use crate::normalize::{decode, InboundPayload, Normalizer};
use crate::topic::{route_topic, RegistrationKind, RoutedTopic, TopicCoordinate, TopicError};

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Events produced and how many of them failed to publish
    Published { events: usize, failed: usize },
    Registered(RegistrationKind),
    RegistrationFailed(RegistrationKind),
    /// Hardware-bound command observed on the broker
    Command,
    /// Outside every known shape
    Ignored,
    /// Malformed topic or payload
    Dropped,
}

pub struct MessageProcessor {
    normalizer: Normalizer,
    publisher: EventPublisher,
    registrar: Arc<dyn Registrar>,
    actions: Arc<ActionCatalog>,
}

impl MessageProcessor {
    pub fn new(
        normalizer: Normalizer,
        publisher: EventPublisher,
        registrar: Arc<dyn Registrar>,
        actions: Arc<ActionCatalog>,
    ) -> Self {
        Self {
            normalizer,
            publisher,
            registrar,
            actions,
        }
    }

    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Outcome {
        match route_topic(topic) {
            Ok(RoutedTopic::Registration(kind)) => self.register(kind, payload).await,
            Ok(RoutedTopic::Operational(coord)) => self.ingest(&coord, topic, payload).await,
            Err(TopicError::Unrecognized) => {
                trace!(topic = %topic, "Ignoring unrelated topic");
                Outcome::Ignored
            }
            Err(e) => {
                warn!(error = %e, "Dropping message");
                Outcome::Dropped
            }
        }
    }

    async fn register(&self, kind: RegistrationKind, payload: &[u8]) -> Outcome {
        let body: Value = match serde_json::from_slice(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Dropping unparseable registration");
                return Outcome::Dropped;
            }
        };

        let controller_id = body.get("controller_id").and_then(Value::as_str).unwrap_or("-");
        let device_id = body.get("device_id").and_then(Value::as_str).unwrap_or("-");

        match self.registrar.register(kind, &body).await {
            Ok(()) => {
                info!(kind = %kind, controller_id, device_id, "Registration forwarded");
                Outcome::Registered(kind)
            }
            Err(e) => {
                error!(kind = %kind, controller_id, device_id, error = %e, "Registration failed");
                Outcome::RegistrationFailed(kind)
            }
        }
    }

    async fn ingest(&self, coord: &TopicCoordinate, topic: &str, payload: &[u8]) -> Outcome {
        let received_at = Utc::now();

        let decoded = match decode(coord, payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping malformed payload");
                return Outcome::Dropped;
            }
        };

        let ack_label = match &decoded {
            InboundPayload::Unrecognized => {
                trace!(topic = %topic, "Ignoring unrecognized message");
                return Outcome::Ignored;
            }
            InboundPayload::Command(command) => {
                debug!(topic = %topic, command = %command, "Command observed");
                return Outcome::Command;
            }
            InboundPayload::Acknowledgement { command, body } if !body.contains_key("state") => {
                self.actions
                    .label_for(coord.effective_device_id(), command)
                    .await
            }
            _ => None,
        };

        let events = self.normalizer.normalize(
            coord,
            decoded,
            ack_label.as_deref(),
            topic,
            received_at,
        );

        let mut failed = 0;
        for event in &events {
            match self.publisher.publish(event).await {
                Ok(_) => debug!(
                    event_type = %event.event_type(),
                    controller_id = %coord.controller_id,
                    device_id = event.device_id().unwrap_or("-"),
                    "Published event"
                ),
                // Already logged per channel by the publisher
                Err(_) => failed += 1,
            }
        }

        Outcome::Published {
            events: events.len(),
            failed,
        }
    }
}
