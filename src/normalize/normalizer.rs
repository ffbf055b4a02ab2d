//! Payload Normalizer
//!
//! Turns a decoded payload plus its topic coordinate into canonical domain
//! events. Normalization is pure: lookups that need I/O (acknowledgement
//! labels) are resolved by the caller and passed in.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};

use super::payload::InboundPayload;
use crate::domain::{
    Attributes, DomainEvent, EventKind, EventMetadata, EventScope, StateChange,
};
use crate::topic::TopicCoordinate;

/// Source recorded in the metadata of every event the gateway produces
pub const GATEWAY_SOURCE: &str = "mqtt-gateway";

/// Keys of a full-status payload that describe the controller, not a device
pub const FULL_STATUS_METADATA_KEYS: [&str; 5] = ["uptime", "ts", "uid", "fw", "timestamp"];

/// Payload fields consulted for the event time, in order
const TIMESTAMP_FIELDS: [&str; 3] = ["timestamp_ms", "timestamp", "ts"];

/// Builds domain events from decoded hardware payloads
#[derive(Debug, Clone)]
pub struct Normalizer {
    source: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(GATEWAY_SOURCE)
    }
}

impl Normalizer {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Normalize one inbound message
    ///
    /// Returns zero events for commands and unrecognized shapes, one event
    /// for most messages and one event per device for full-status responses.
    /// `ack_label` is the human label for an acknowledged command whose
    /// payload carried no `state`; when absent the command is Title Cased.
    pub fn normalize(
        &self,
        coord: &TopicCoordinate,
        payload: InboundPayload,
        ack_label: Option<&str>,
        topic: &str,
        received_at: DateTime<Utc>,
    ) -> Vec<DomainEvent> {
        match payload {
            InboundPayload::Acknowledgement { command, body } => {
                vec![self.acknowledgement(coord, command, body, ack_label, topic, received_at)]
            }
            InboundPayload::Heartbeat(body) => {
                let timestamp = event_time(&body, received_at);
                vec![DomainEvent::new(
                    EventKind::ControllerHeartbeat(Attributes(body)),
                    scope(coord, coord.effective_device_id()),
                    timestamp,
                    self.metadata(topic),
                )]
            }
            InboundPayload::Connection { online, body } => {
                let timestamp = event_time(&body, received_at);
                let kind = if online {
                    EventKind::ControllerOnline(Attributes(body))
                } else {
                    EventKind::ControllerOffline(Attributes(body))
                };
                vec![DomainEvent::new(
                    kind,
                    scope(coord, coord.effective_device_id()),
                    timestamp,
                    self.metadata(topic),
                )]
            }
            InboundPayload::DeviceState(value) => {
                let timestamp = value
                    .as_object()
                    .map(|body| event_time(body, received_at))
                    .unwrap_or(received_at);
                vec![DomainEvent::new(
                    EventKind::DeviceStateChanged(StateChange {
                        previous_state: None,
                        new_state: value.clone(),
                        command_acknowledged: None,
                        raw_payload: value,
                    }),
                    scope(coord, coord.effective_device_id()),
                    timestamp,
                    self.metadata(topic),
                )]
            }
            InboundPayload::FullStatus(body) => self.full_status(coord, body, topic, received_at),
            InboundPayload::Command(_) | InboundPayload::Unrecognized => Vec::new(),
        }
    }

    fn acknowledgement(
        &self,
        coord: &TopicCoordinate,
        command: String,
        body: Map<String, Value>,
        ack_label: Option<&str>,
        topic: &str,
        received_at: DateTime<Utc>,
    ) -> DomainEvent {
        let timestamp = event_time(&body, received_at);
        let raw_payload = Value::Object(body.clone());

        let mut new_state = body;
        if !new_state.contains_key("state") {
            let label = ack_label
                .map(str::to_string)
                .unwrap_or_else(|| command_label(&command));
            new_state.insert("state".to_string(), Value::String(label));
        }
        new_state.insert("command".to_string(), Value::String(command.clone()));

        let mut metadata = self.metadata(topic);
        metadata.is_acknowledgement = true;

        DomainEvent::new(
            EventKind::DeviceStateChanged(StateChange {
                previous_state: None,
                new_state: Value::Object(new_state),
                command_acknowledged: Some(command),
                raw_payload,
            }),
            scope(coord, coord.effective_device_id()),
            timestamp,
            metadata,
        )
    }

    fn full_status(
        &self,
        coord: &TopicCoordinate,
        body: Map<String, Value>,
        topic: &str,
        received_at: DateTime<Utc>,
    ) -> Vec<DomainEvent> {
        let timestamp = event_time(&body, received_at);
        let raw_payload = Value::Object(body.clone());

        body.iter()
            .filter(|(key, _)| !FULL_STATUS_METADATA_KEYS.contains(&key.as_str()))
            .map(|(device_id, value)| {
                let mut metadata = self.metadata(topic);
                metadata.is_full_status = true;
                let state = if is_truthy(value) { 1 } else { 0 };

                DomainEvent::new(
                    EventKind::DeviceStateChanged(StateChange {
                        previous_state: None,
                        new_state: json!({ "power": value, "state": state }),
                        command_acknowledged: None,
                        raw_payload: raw_payload.clone(),
                    }),
                    scope(coord, device_id),
                    timestamp,
                    metadata,
                )
            })
            .collect()
    }

    fn metadata(&self, topic: &str) -> EventMetadata {
        EventMetadata {
            source: self.source.clone(),
            mqtt_topic: Some(topic.to_string()),
            is_acknowledgement: false,
            is_full_status: false,
        }
    }
}

fn scope(coord: &TopicCoordinate, device_id: &str) -> EventScope {
    EventScope {
        tenant_id: Some(coord.namespace.clone()),
        room_id: Some(coord.room_id.clone()),
        controller_id: Some(coord.controller_id.clone()),
        device_id: Some(device_id.to_string()),
        ..Default::default()
    }
}

/// Human label for a command identifier: `power_on` becomes `Power On`
pub fn command_label(command: &str) -> String {
    command
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Event time from the payload, falling back to the receive time
///
/// Accepts epoch milliseconds or an RFC 3339 string.
pub fn event_time(body: &Map<String, Value>, received_at: DateTime<Utc>) -> DateTime<Utc> {
    TIMESTAMP_FIELDS
        .iter()
        .filter_map(|field| body.get(*field))
        .find_map(parse_timestamp)
        .unwrap_or(received_at)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            if millis <= 0 {
                return None;
            }
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Truthiness as the firmware-facing tooling understands it
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
