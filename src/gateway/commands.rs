//! Hardware command routing
//!
//! Resolves commands arriving on the bus into MQTT topic + payload pairs.
//! The reverse path never produces domain events.

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::bus::{Channel, Dispatcher, Result as BusResult, SubscriptionHandle};
use crate::normalize::normalizer::is_truthy;
use crate::topic::{device_command_topic, status_request_topic};

/// Device segment used when a command targets the controller itself
const CONTROLLER_SEGMENT: &str = "controller";

/// Power command: `{controller_id, room_id, command: {state, device_id}}`
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCommand {
    pub controller_id: String,
    pub room_id: String,
    pub command: PowerCommand,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PowerCommand {
    pub device_id: String,
    /// Desired power state; any truthy value means on
    #[serde(default)]
    pub state: Value,
}

/// Arbitrary named command for one device
#[derive(Debug, Clone, Deserialize)]
pub struct GenericCommand {
    pub controller_id: String,
    pub device_id: String,
    pub room_id: String,
    pub command: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Ask a controller to publish its full status
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub controller_id: String,
    pub room_id: String,
}

/// Power verb derived from the desired state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
}

impl PowerAction {
    pub fn from_state(state: &Value) -> Self {
        if is_truthy(state) {
            PowerAction::On
        } else {
            PowerAction::Off
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::On => "power_on",
            PowerAction::Off => "power_off",
        }
    }
}

/// A message ready to be published to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid command on {channel}: {source}")]
    Decode {
        channel: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {field} '{value}': must be non-empty and free of topic separators")]
    InvalidSegment { field: &'static str, value: String },

    #[error("Channel {0} does not carry hardware commands")]
    UnsupportedChannel(String),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Maps bus commands onto outbound MQTT topics under one namespace
#[derive(Debug, Clone)]
pub struct CommandRouter {
    namespace: String,
}

impl CommandRouter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Resolve a raw command received on one of the hardware command channels
    pub fn resolve(&self, channel: &Channel, message: &Value) -> Result<OutboundMessage> {
        let decode = |source| CommandError::Decode {
            channel: channel.name(),
            source,
        };

        match channel {
            Channel::DeviceCommands => {
                let command = DeviceCommand::deserialize(message).map_err(decode)?;
                self.device_power(&command)
            }
            Channel::DeviceGenericCommands => {
                let command = GenericCommand::deserialize(message).map_err(decode)?;
                self.device_generic(&command)
            }
            Channel::StatusRequests => {
                let request = StatusRequest::deserialize(message).map_err(decode)?;
                self.status_request(&request, chrono::Utc::now().timestamp_millis())
            }
            other => Err(CommandError::UnsupportedChannel(other.name())),
        }
    }

    pub fn device_power(&self, command: &DeviceCommand) -> Result<OutboundMessage> {
        let action = PowerAction::from_state(&command.command.state);
        Ok(OutboundMessage {
            topic: device_command_topic(
                &self.namespace,
                segment("room_id", &command.room_id)?,
                segment("controller_id", &command.controller_id)?,
                segment("device_id", &command.command.device_id)?,
                action.as_str(),
            ),
            payload: json!({ "device_id": command.command.device_id }),
        })
    }

    pub fn device_generic(&self, command: &GenericCommand) -> Result<OutboundMessage> {
        Ok(OutboundMessage {
            topic: device_command_topic(
                &self.namespace,
                segment("room_id", &command.room_id)?,
                segment("controller_id", &command.controller_id)?,
                segment("device_id", &command.device_id)?,
                segment("command", &command.command)?,
            ),
            payload: command
                .payload
                .clone()
                .filter(|p| !p.is_null())
                .unwrap_or_else(|| Value::Object(Map::new())),
        })
    }

    pub fn status_request(&self, request: &StatusRequest, now_ms: i64) -> Result<OutboundMessage> {
        Ok(OutboundMessage {
            topic: status_request_topic(
                &self.namespace,
                segment("room_id", &request.room_id)?,
                segment("controller_id", &request.controller_id)?,
            ),
            payload: json!({ "command": "request_status", "ts": now_ms }),
        })
    }
}

/// Reject identifiers that would change the shape of the topic
fn segment<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() || value.contains(['/', '+', '#']) {
        Err(CommandError::InvalidSegment {
            field,
            value: value.to_string(),
        })
    } else {
        Ok(value)
    }
}

/// Destination for resolved hardware commands
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl CommandSink for AsyncClient {
    /// QoS 1, never retained
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(&message.payload)?;
        self.publish(message.topic, QoS::AtLeastOnce, false, bytes)
            .await?;
        Ok(())
    }
}

/// Subscribe the three hardware command channels and forward every
/// resolved command to the sink
pub async fn bridge_commands(
    dispatcher: &Dispatcher<Value>,
    router: CommandRouter,
    sink: Arc<dyn CommandSink>,
) -> BusResult<Vec<SubscriptionHandle>> {
    let mut handles = Vec::new();

    for channel in Channel::hardware_commands() {
        let router = router.clone();
        let sink = sink.clone();
        let source = channel.clone();

        let handle = dispatcher
            .subscribe(&channel.name(), move |message: Arc<Value>| {
                let router = router.clone();
                let sink = sink.clone();
                let source = source.clone();
                async move {
                    let outbound = router.resolve(&source, &message)?;
                    info!(channel = %source, topic = %outbound.topic, "Forwarding command to hardware");
                    sink.send(outbound).await
                }
            })
            .await?;
        handles.push(handle);
    }

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusTransport, MemoryBus};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn router() -> CommandRouter {
        CommandRouter::new("paragon")
    }

    #[test]
    fn test_power_command_topics() {
        let on = json!({
            "device_id": "d1",
            "room_id": "r1",
            "controller_id": "c1",
            "command": {"state": true, "device_id": "d1"}
        });
        let message = router().resolve(&Channel::DeviceCommands, &on).unwrap();
        assert_eq!(message.topic, "paragon/r1/commands/c1/d1/power_on");
        assert_eq!(message.payload, json!({"device_id": "d1"}));

        let off = json!({
            "room_id": "r1",
            "controller_id": "c1",
            "command": {"state": false, "device_id": "d1"}
        });
        let message = router().resolve(&Channel::DeviceCommands, &off).unwrap();
        assert_eq!(message.topic, "paragon/r1/commands/c1/d1/power_off");
    }

    #[test]
    fn test_power_action_truthiness() {
        assert_eq!(PowerAction::from_state(&json!(1)), PowerAction::On);
        assert_eq!(PowerAction::from_state(&json!(0)), PowerAction::Off);
        assert_eq!(PowerAction::from_state(&Value::Null), PowerAction::Off);
    }

    #[test]
    fn test_generic_command() {
        let message = router()
            .resolve(
                &Channel::DeviceGenericCommands,
                &json!({
                    "controller_id": "lights",
                    "device_id": "strip",
                    "room_id": "r1",
                    "command": "set_color",
                    "payload": {"r": 255}
                }),
            )
            .unwrap();
        assert_eq!(message.topic, "paragon/r1/commands/lights/strip/set_color");
        assert_eq!(message.payload, json!({"r": 255}));

        let message = router()
            .resolve(
                &Channel::DeviceGenericCommands,
                &json!({"controller_id": "c", "device_id": "d", "room_id": "r", "command": "reset"}),
            )
            .unwrap();
        assert_eq!(message.payload, json!({}));
    }

    #[test]
    fn test_status_request() {
        let request = StatusRequest {
            controller_id: "c1".to_string(),
            room_id: "r1".to_string(),
        };
        let message = router().status_request(&request, 1234).unwrap();
        assert_eq!(message.topic, "paragon/r1/commands/c1/controller/request_status");
        assert_eq!(message.payload, json!({"command": "request_status", "ts": 1234}));
    }

    #[test]
    fn test_rejects_bad_input() {
        let err = router()
            .resolve(&Channel::DeviceCommands, &json!({"room_id": "r1"}))
            .unwrap_err();
        assert!(matches!(err, CommandError::Decode { .. }));

        let err = router()
            .resolve(
                &Channel::StatusRequests,
                &json!({"controller_id": "c/#", "room_id": "r1"}),
            )
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidSegment { field: "controller_id", .. }));

        let err = router().resolve(&Channel::GmCommands, &json!({})).unwrap_err();
        assert!(matches!(err, CommandError::UnsupportedChannel(_)));
    }

    struct RecordingSink(mpsc::UnboundedSender<OutboundMessage>);

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
            self.0.send(message)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bridge_forwards_bus_commands() {
        let bus = Arc::new(MemoryBus::default());
        let dispatcher = Dispatcher::new(bus.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handles = bridge_commands(&dispatcher, router(), Arc::new(RecordingSink(tx)))
            .await
            .unwrap();
        assert_eq!(handles.len(), 3);

        bus.publish(
            "sentient:commands:status_request",
            r#"{"controller_id": "c1", "room_id": "r1"}"#,
        )
        .await
        .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.topic, "paragon/r1/commands/c1/controller/request_status");
    }
}
