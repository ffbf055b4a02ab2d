//! Inbound Payload Decoding
//!
//! Classifies a message by its topic coordinate first and only then decodes
//! the bytes into the shape that category expects. Traffic outside the known
//! shapes becomes [`InboundPayload::Unrecognized`] without touching the body.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::topic::{Category, TopicCoordinate};

/// Sentinel value of the `state` field in a connection announcement
pub const ONLINE_SENTINEL: &str = "online";

/// Decoded payload, keyed by `(category, message_kind)`
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    /// Controller confirmed a command it executed
    Acknowledgement {
        command: String,
        body: Map<String, Value>,
    },
    /// Periodic controller heartbeat
    Heartbeat(Map<String, Value>),
    /// Controller connection announcement
    Connection {
        online: bool,
        body: Map<String, Value>,
    },
    /// Single device state, reported via `status/.../state` or `sensors/...`
    DeviceState(Value),
    /// Complete state of every device under one controller
    FullStatus(Map<String, Value>),
    /// Command seen on the shared broker, hardware-bound
    Command(Value),
    /// Shape outside every known rule
    Unrecognized,
}

/// Errors raised while decoding a payload
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

pub type Result<T> = std::result::Result<T, PayloadError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Acknowledgement,
    Heartbeat,
    Connection,
    DeviceState,
    FullStatus,
    Command,
}

fn classify(coord: &TopicCoordinate) -> Option<Shape> {
    match coord.category {
        Category::Acknowledgement => Some(Shape::Acknowledgement),
        Category::Sensors => Some(Shape::DeviceState),
        Category::Commands => Some(Shape::Command),
        Category::Status if coord.is_full_status() => Some(Shape::FullStatus),
        Category::Status => match coord.message_kind.as_deref() {
            Some("heartbeat") => Some(Shape::Heartbeat),
            Some("connection") => Some(Shape::Connection),
            Some("state") => Some(Shape::DeviceState),
            _ => None,
        },
    }
}

/// Decode raw message bytes for the given coordinate
pub fn decode(coord: &TopicCoordinate, raw: &[u8]) -> Result<InboundPayload> {
    let Some(shape) = classify(coord) else {
        return Ok(InboundPayload::Unrecognized);
    };

    let value: Value = serde_json::from_slice(raw)?;

    let payload = match shape {
        Shape::Acknowledgement => {
            // Routing rejects acknowledgements without a command segment
            let Some(command) = coord.message_kind.clone() else {
                return Ok(InboundPayload::Unrecognized);
            };
            InboundPayload::Acknowledgement {
                command,
                body: into_object(value)?,
            }
        }
        Shape::Heartbeat => InboundPayload::Heartbeat(into_object(value)?),
        Shape::Connection => {
            let body = into_object(value)?;
            let online = body.get("state").and_then(Value::as_str) == Some(ONLINE_SENTINEL);
            InboundPayload::Connection { online, body }
        }
        Shape::DeviceState => InboundPayload::DeviceState(value),
        Shape::FullStatus => InboundPayload::FullStatus(into_object(value)?),
        Shape::Command => InboundPayload::Command(value),
    };

    Ok(payload)
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Err(PayloadError::NotAnObject("null")),
        Value::Bool(_) => Err(PayloadError::NotAnObject("boolean")),
        Value::Number(_) => Err(PayloadError::NotAnObject("number")),
        Value::String(_) => Err(PayloadError::NotAnObject("string")),
        Value::Array(_) => Err(PayloadError::NotAnObject("array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::parse_operational;
    use serde_json::json;

    fn decode_on(topic: &str, raw: &str) -> Result<InboundPayload> {
        let coord = parse_operational(topic).unwrap();
        decode(&coord, raw.as_bytes())
    }

    #[test]
    fn test_acknowledgement() {
        let payload = decode_on(
            "ns/room1/acknowledgement/ctrlA/devB/power_on",
            r#"{"state": true}"#,
        )
        .unwrap();
        match payload {
            InboundPayload::Acknowledgement { command, body } => {
                assert_eq!(command, "power_on");
                assert_eq!(body.get("state"), Some(&json!(true)));
            }
            other => panic!("Expected Acknowledgement, got {:?}", other),
        }
    }

    #[test]
    fn test_connection_sentinel() {
        let online = decode_on("ns/room/status/ctrl/connection", r#"{"state": "online"}"#).unwrap();
        assert!(matches!(online, InboundPayload::Connection { online: true, .. }));

        let offline = decode_on("ns/room/status/ctrl/connection", r#"{"state": "gone"}"#).unwrap();
        assert!(matches!(offline, InboundPayload::Connection { online: false, .. }));

        let missing = decode_on("ns/room/status/ctrl/connection", "{}").unwrap();
        assert!(matches!(missing, InboundPayload::Connection { online: false, .. }));
    }

    #[test]
    fn test_heartbeat_and_state() {
        let hb = decode_on("ns/room/status/ctrl/heartbeat", r#"{"uptime": 5}"#).unwrap();
        assert!(matches!(hb, InboundPayload::Heartbeat(_)));

        let state = decode_on("ns/room/status/ctrl/dev/state", r#"{"on": 1}"#).unwrap();
        assert_eq!(state, InboundPayload::DeviceState(json!({"on": 1})));
    }

    #[test]
    fn test_sensor_scalar_accepted() {
        let reading = decode_on("ns/room/sensors/ctrl/thermo/temperature", "21.5").unwrap();
        assert_eq!(reading, InboundPayload::DeviceState(json!(21.5)));
    }

    #[test]
    fn test_full_status() {
        let full = decode_on("ns/room/status/ctrl/full", r#"{"relay1": true}"#).unwrap();
        assert!(matches!(full, InboundPayload::FullStatus(ref m) if m.len() == 1));
    }

    #[test]
    fn test_unrecognized_skips_parsing() {
        let unknown = decode_on("ns/room/status/ctrl/firmware", "not json at all").unwrap();
        assert_eq!(unknown, InboundPayload::Unrecognized);

        let bare = decode_on("ns/room/status/ctrl", "not json").unwrap();
        assert_eq!(bare, InboundPayload::Unrecognized);
    }

    #[test]
    fn test_invalid_json() {
        let err = decode_on("ns/room/sensors/ctrl/dev/state", "{broken").unwrap_err();
        assert!(matches!(err, PayloadError::InvalidJson(_)));
    }

    #[test]
    fn test_object_required() {
        let err = decode_on("ns/room/status/ctrl/heartbeat", "[1, 2]").unwrap_err();
        assert!(matches!(err, PayloadError::NotAnObject("array")));

        let err = decode_on("ns/room/acknowledgement/c/d/power_on", "true").unwrap_err();
        assert!(matches!(err, PayloadError::NotAnObject("boolean")));
    }

    #[test]
    fn test_commands_any_json() {
        let cmd = decode_on("ns/room/commands/ctrl/dev/power_on", r#""go""#).unwrap();
        assert_eq!(cmd, InboundPayload::Command(json!("go")));
    }
}
