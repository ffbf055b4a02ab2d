//! WebSocket Message Types
//!
//! Control messages from dashboard clients and the notices the server pushes
//! back. Replies to control messages are keyed by `action`, pushed notices by
//! `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainEvent;

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the rooms named by each channel (e.g. `"gm:room:clockwork"`)
    Subscribe {
        #[serde(default)]
        channels: Vec<String>,
        #[serde(default)]
        message_id: Option<String>,
    },
    /// Leave the rooms named by each channel
    Unsubscribe {
        #[serde(default)]
        channels: Vec<String>,
        #[serde(default)]
        message_id: Option<String>,
    },
    /// Keepalive
    Ping,
}

/// Reply to a control message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Reply {
    Ack {
        message_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Server-initiated notice
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// A domain event from the bus
    EventNotification {
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        data: DomainEvent,
        timestamp: DateTime<Utc>,
    },
    /// Sent once, right after the socket opens
    Connection { status: String, client_id: String },
    Error { message: String },
    Pong,
}

/// Anything the server sends to a client
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Reply(Reply),
    Notice(Notice),
}

impl ServerMessage {
    /// Acknowledge a control message; a missing id gets a fresh one
    pub fn ack(message_id: Option<String>, success: bool, error: Option<String>) -> Self {
        ServerMessage::Reply(Reply::Ack {
            message_id: message_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            success,
            error,
        })
    }

    /// Room-scoped copy of an event: carries the event's room and session
    pub fn room_event(event: &DomainEvent) -> Self {
        ServerMessage::Notice(Notice::EventNotification {
            room_id: event.room_id().map(str::to_string),
            session_id: event.session_id().map(str::to_string),
            data: event.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Global copy of an event
    pub fn global_event(event: &DomainEvent) -> Self {
        ServerMessage::Notice(Notice::EventNotification {
            room_id: None,
            session_id: None,
            data: event.clone(),
            timestamp: Utc::now(),
        })
    }

    pub fn connected(client_id: &str) -> Self {
        ServerMessage::Notice(Notice::Connection {
            status: "connected".to_string(),
            client_id: client_id.to_string(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Notice(Notice::Error {
            message: message.into(),
        })
    }

    pub fn pong() -> Self {
        ServerMessage::Notice(Notice::Pong)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attributes, EventKind, EventMetadata, EventScope};
    use serde_json::{json, Value};

    fn event() -> DomainEvent {
        DomainEvent::new(
            EventKind::PuzzleSolved(Attributes::default()),
            EventScope {
                room_id: Some("clockwork".to_string()),
                session_id: Some("s1".to_string()),
                ..Default::default()
            },
            Utc::now(),
            EventMetadata::default(),
        )
    }

    #[test]
    fn test_client_message_deserialize_subscribe() {
        let json = r#"{"action": "subscribe", "channels": ["gm:room:r1", "gm:room:r2"], "message_id": "m-1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Subscribe {
                channels,
                message_id,
            } => {
                assert_eq!(channels.len(), 2);
                assert_eq!(message_id.as_deref(), Some("m-1"));
            }
            _ => panic!("Expected Subscribe"),
        }
    }

    #[test]
    fn test_client_message_deserialize_ping() {
        let msg: ClientMessage = serde_json::from_str(r#"{"action": "ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_ack_shape() {
        let value = serde_json::to_value(ServerMessage::ack(Some("m-1".into()), true, None)).unwrap();
        assert_eq!(value, json!({"action": "ack", "message_id": "m-1", "success": true}));

        let value = serde_json::to_value(ServerMessage::ack(None, false, Some("nope".into()))).unwrap();
        assert!(!value["message_id"].as_str().unwrap().is_empty());
        assert_eq!(value["error"], "nope");
    }

    #[test]
    fn test_event_notification_shapes() {
        let event = event();

        let room = serde_json::to_value(ServerMessage::room_event(&event)).unwrap();
        assert_eq!(room["type"], "event_notification");
        assert_eq!(room["room_id"], "clockwork");
        assert_eq!(room["session_id"], "s1");
        assert_eq!(room["data"]["type"], "puzzle_solved");

        let global = serde_json::to_value(ServerMessage::global_event(&event)).unwrap();
        assert_eq!(global["room_id"], Value::Null);
        assert!(global.get("session_id").is_none());
        assert!(global["timestamp"].is_string());
    }

    #[test]
    fn test_connection_notice() {
        let value = serde_json::to_value(ServerMessage::connected("abc-123")).unwrap();
        assert_eq!(
            value,
            json!({"type": "connection", "status": "connected", "client_id": "abc-123"})
        );
    }
}
