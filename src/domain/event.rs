//! Domain Event Types
//!
//! The canonical, transport-agnostic envelope published on the event bus.
//! Every event kind carries its own payload type so consumers can match
//! exhaustively on [`EventKind`] instead of dispatching on strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Closed set of event kinds, serialized as their snake_case wire names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Device
    DeviceStateChanged,
    DeviceOnline,
    DeviceOffline,
    DeviceError,

    // Controller
    ControllerRegistered,
    ControllerOnline,
    ControllerOffline,
    ControllerHeartbeat,
    ControllerError,

    // Puzzle
    PuzzleStarted,
    PuzzleProgress,
    PuzzleSolved,
    PuzzleFailed,
    PuzzleReset,
    PuzzleSkipped,

    // Scene
    SceneStarted,
    SceneAdvanced,
    SceneCompleted,

    // Game session
    SessionCreated,
    SessionStarted,
    SessionPaused,
    SessionResumed,
    SessionCompleted,
    SessionAbandoned,

    // Game master
    HintUsed,
    ManualOverride,
    GmCommand,

    // Safety
    EmergencyStopTriggered,
    EmergencyStopCleared,
    MaglockReleased,
    SafetyAlert,

    // Audio
    AudioCuePlay,
    AudioCueStop,
    AudioHotkeyPlay,
    AudioHotkeyOn,
    AudioHotkeyOff,
    AudioStopAll,
    AudioFadeAll,
    AudioSetMasterVolume,
}

/// Coarse grouping of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Device,
    Controller,
    Puzzle,
    Scene,
    Session,
    Gm,
    Safety,
    Audio,
}

impl EventType {
    /// Wire name of this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DeviceStateChanged => "device_state_changed",
            EventType::DeviceOnline => "device_online",
            EventType::DeviceOffline => "device_offline",
            EventType::DeviceError => "device_error",
            EventType::ControllerRegistered => "controller_registered",
            EventType::ControllerOnline => "controller_online",
            EventType::ControllerOffline => "controller_offline",
            EventType::ControllerHeartbeat => "controller_heartbeat",
            EventType::ControllerError => "controller_error",
            EventType::PuzzleStarted => "puzzle_started",
            EventType::PuzzleProgress => "puzzle_progress",
            EventType::PuzzleSolved => "puzzle_solved",
            EventType::PuzzleFailed => "puzzle_failed",
            EventType::PuzzleReset => "puzzle_reset",
            EventType::PuzzleSkipped => "puzzle_skipped",
            EventType::SceneStarted => "scene_started",
            EventType::SceneAdvanced => "scene_advanced",
            EventType::SceneCompleted => "scene_completed",
            EventType::SessionCreated => "session_created",
            EventType::SessionStarted => "session_started",
            EventType::SessionPaused => "session_paused",
            EventType::SessionResumed => "session_resumed",
            EventType::SessionCompleted => "session_completed",
            EventType::SessionAbandoned => "session_abandoned",
            EventType::HintUsed => "hint_used",
            EventType::ManualOverride => "manual_override",
            EventType::GmCommand => "gm_command",
            EventType::EmergencyStopTriggered => "emergency_stop_triggered",
            EventType::EmergencyStopCleared => "emergency_stop_cleared",
            EventType::MaglockReleased => "maglock_released",
            EventType::SafetyAlert => "safety_alert",
            EventType::AudioCuePlay => "audio_cue_play",
            EventType::AudioCueStop => "audio_cue_stop",
            EventType::AudioHotkeyPlay => "audio_hotkey_play",
            EventType::AudioHotkeyOn => "audio_hotkey_on",
            EventType::AudioHotkeyOff => "audio_hotkey_off",
            EventType::AudioStopAll => "audio_stop_all",
            EventType::AudioFadeAll => "audio_fade_all",
            EventType::AudioSetMasterVolume => "audio_set_master_volume",
        }
    }

    /// Category this event type belongs to
    pub fn category(&self) -> EventCategory {
        match self {
            EventType::DeviceStateChanged
            | EventType::DeviceOnline
            | EventType::DeviceOffline
            | EventType::DeviceError => EventCategory::Device,
            EventType::ControllerRegistered
            | EventType::ControllerOnline
            | EventType::ControllerOffline
            | EventType::ControllerHeartbeat
            | EventType::ControllerError => EventCategory::Controller,
            EventType::PuzzleStarted
            | EventType::PuzzleProgress
            | EventType::PuzzleSolved
            | EventType::PuzzleFailed
            | EventType::PuzzleReset
            | EventType::PuzzleSkipped => EventCategory::Puzzle,
            EventType::SceneStarted | EventType::SceneAdvanced | EventType::SceneCompleted => {
                EventCategory::Scene
            }
            EventType::SessionCreated
            | EventType::SessionStarted
            | EventType::SessionPaused
            | EventType::SessionResumed
            | EventType::SessionCompleted
            | EventType::SessionAbandoned => EventCategory::Session,
            EventType::HintUsed | EventType::ManualOverride | EventType::GmCommand => {
                EventCategory::Gm
            }
            EventType::EmergencyStopTriggered
            | EventType::EmergencyStopCleared
            | EventType::MaglockReleased
            | EventType::SafetyAlert => EventCategory::Safety,
            EventType::AudioCuePlay
            | EventType::AudioCueStop
            | EventType::AudioHotkeyPlay
            | EventType::AudioHotkeyOn
            | EventType::AudioHotkeyOff
            | EventType::AudioStopAll
            | EventType::AudioFadeAll
            | EventType::AudioSetMasterVolume => EventCategory::Audio,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Payloads
// ============================================

/// A device moved to a new state
///
/// `previous_state` is always null for hardware-originated events: the
/// gateway does not track state, it only relays what controllers report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    #[serde(default)]
    pub previous_state: Option<Value>,
    #[serde(default)]
    pub new_state: Value,
    /// Command this state change confirms, set for acknowledgements only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_acknowledged: Option<String>,
    /// The payload exactly as the controller sent it
    #[serde(default, alias = "raw_mqtt_payload")]
    pub raw_payload: Value,
}

/// Error report from a device or controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
}

/// Free-form key/value payload for event kinds without a fixed shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes(pub Map<String, Value>);

impl Attributes {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Event kind together with its payload
///
/// Serialized adjacently as `"type"` + `"payload"` so the wire shape stays
/// `{..., "type": "device_state_changed", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    DeviceStateChanged(StateChange),
    DeviceOnline(Attributes),
    DeviceOffline(Attributes),
    DeviceError(Fault),

    ControllerRegistered(Attributes),
    ControllerOnline(Attributes),
    ControllerOffline(Attributes),
    ControllerHeartbeat(Attributes),
    ControllerError(Fault),

    PuzzleStarted(Attributes),
    PuzzleProgress(Attributes),
    PuzzleSolved(Attributes),
    PuzzleFailed(Attributes),
    PuzzleReset(Attributes),
    PuzzleSkipped(Attributes),

    SceneStarted(Attributes),
    SceneAdvanced(Attributes),
    SceneCompleted(Attributes),

    SessionCreated(Attributes),
    SessionStarted(Attributes),
    SessionPaused(Attributes),
    SessionResumed(Attributes),
    SessionCompleted(Attributes),
    SessionAbandoned(Attributes),

    HintUsed(Attributes),
    ManualOverride(Attributes),
    GmCommand(Attributes),

    EmergencyStopTriggered(Attributes),
    EmergencyStopCleared(Attributes),
    MaglockReleased(Attributes),
    SafetyAlert(Attributes),

    AudioCuePlay(Attributes),
    AudioCueStop(Attributes),
    AudioHotkeyPlay(Attributes),
    AudioHotkeyOn(Attributes),
    AudioHotkeyOff(Attributes),
    AudioStopAll(Attributes),
    AudioFadeAll(Attributes),
    AudioSetMasterVolume(Attributes),
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::DeviceStateChanged(_) => EventType::DeviceStateChanged,
            EventKind::DeviceOnline(_) => EventType::DeviceOnline,
            EventKind::DeviceOffline(_) => EventType::DeviceOffline,
            EventKind::DeviceError(_) => EventType::DeviceError,
            EventKind::ControllerRegistered(_) => EventType::ControllerRegistered,
            EventKind::ControllerOnline(_) => EventType::ControllerOnline,
            EventKind::ControllerOffline(_) => EventType::ControllerOffline,
            EventKind::ControllerHeartbeat(_) => EventType::ControllerHeartbeat,
            EventKind::ControllerError(_) => EventType::ControllerError,
            EventKind::PuzzleStarted(_) => EventType::PuzzleStarted,
            EventKind::PuzzleProgress(_) => EventType::PuzzleProgress,
            EventKind::PuzzleSolved(_) => EventType::PuzzleSolved,
            EventKind::PuzzleFailed(_) => EventType::PuzzleFailed,
            EventKind::PuzzleReset(_) => EventType::PuzzleReset,
            EventKind::PuzzleSkipped(_) => EventType::PuzzleSkipped,
            EventKind::SceneStarted(_) => EventType::SceneStarted,
            EventKind::SceneAdvanced(_) => EventType::SceneAdvanced,
            EventKind::SceneCompleted(_) => EventType::SceneCompleted,
            EventKind::SessionCreated(_) => EventType::SessionCreated,
            EventKind::SessionStarted(_) => EventType::SessionStarted,
            EventKind::SessionPaused(_) => EventType::SessionPaused,
            EventKind::SessionResumed(_) => EventType::SessionResumed,
            EventKind::SessionCompleted(_) => EventType::SessionCompleted,
            EventKind::SessionAbandoned(_) => EventType::SessionAbandoned,
            EventKind::HintUsed(_) => EventType::HintUsed,
            EventKind::ManualOverride(_) => EventType::ManualOverride,
            EventKind::GmCommand(_) => EventType::GmCommand,
            EventKind::EmergencyStopTriggered(_) => EventType::EmergencyStopTriggered,
            EventKind::EmergencyStopCleared(_) => EventType::EmergencyStopCleared,
            EventKind::MaglockReleased(_) => EventType::MaglockReleased,
            EventKind::SafetyAlert(_) => EventType::SafetyAlert,
            EventKind::AudioCuePlay(_) => EventType::AudioCuePlay,
            EventKind::AudioCueStop(_) => EventType::AudioCueStop,
            EventKind::AudioHotkeyPlay(_) => EventType::AudioHotkeyPlay,
            EventKind::AudioHotkeyOn(_) => EventType::AudioHotkeyOn,
            EventKind::AudioHotkeyOff(_) => EventType::AudioHotkeyOff,
            EventKind::AudioStopAll(_) => EventType::AudioStopAll,
            EventKind::AudioFadeAll(_) => EventType::AudioFadeAll,
            EventKind::AudioSetMasterVolume(_) => EventType::AudioSetMasterVolume,
        }
    }
}

// ============================================
// Envelope
// ============================================

/// Identifiers scoping an event to a tenant, room, session or piece of hardware
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puzzle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
}

/// Transport provenance of an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Component that produced the event (e.g. "mqtt-gateway")
    #[serde(default)]
    pub source: String,
    /// Raw MQTT topic the event was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_topic: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_acknowledgement: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_full_status: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Canonical domain event
///
/// Created once at normalization time and never mutated afterwards.
/// Timestamps come from hardware clocks when available, so ordering across
/// devices is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent")]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub scope: EventScope,
    #[serde(flatten)]
    pub kind: EventKind,
    pub metadata: EventMetadata,
}

impl DomainEvent {
    /// Create an event with a freshly generated ID
    pub fn new(
        kind: EventKind,
        scope: EventScope,
        timestamp: DateTime<Utc>,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp,
            scope,
            kind,
            metadata,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.scope.room_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.scope.session_id.as_deref()
    }

    pub fn controller_id(&self) -> Option<&str> {
        self.scope.controller_id.as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.scope.device_id.as_deref()
    }

    pub fn is_acknowledgement(&self) -> bool {
        self.metadata.is_acknowledgement
    }
}

/// Lenient wire form accepted from other services on the bus
///
/// Older producers send the payload under `data`, and some omit it entirely
/// for kinds that carry nothing.
#[derive(Deserialize)]
struct WireEvent {
    event_id: Uuid,
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    scope: EventScope,
    #[serde(default, alias = "data")]
    payload: Value,
    #[serde(default)]
    metadata: EventMetadata,
}

impl TryFrom<WireEvent> for DomainEvent {
    type Error = serde_json::Error;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let payload = match wire.payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let mut tagged = Map::new();
        tagged.insert("type".to_string(), Value::String(wire.event_type.as_str().to_string()));
        tagged.insert("payload".to_string(), payload);
        let kind: EventKind = serde_json::from_value(Value::Object(tagged))?;

        Ok(Self {
            event_id: wire.event_id,
            timestamp: wire.timestamp,
            scope: wire.scope,
            kind,
            metadata: wire.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_change_event() -> DomainEvent {
        DomainEvent::new(
            EventKind::DeviceStateChanged(StateChange {
                previous_state: None,
                new_state: json!({"power": true}),
                command_acknowledged: Some("power_on".to_string()),
                raw_payload: json!({"state": true}),
            }),
            EventScope {
                tenant_id: Some("paragon".to_string()),
                room_id: Some("clockwork".to_string()),
                controller_id: Some("ctrl_a".to_string()),
                device_id: Some("dev_b".to_string()),
                ..Default::default()
            },
            Utc::now(),
            EventMetadata {
                source: "mqtt-gateway".to_string(),
                mqtt_topic: Some("paragon/clockwork/acknowledgement/ctrl_a/dev_b/power_on".to_string()),
                is_acknowledgement: true,
                is_full_status: false,
            },
        )
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::DeviceStateChanged.as_str(), "device_state_changed");
        assert_eq!(EventType::GmCommand.to_string(), "gm_command");
        let json = serde_json::to_string(&EventType::AudioSetMasterVolume).unwrap();
        assert_eq!(json, "\"audio_set_master_volume\"");
    }

    #[test]
    fn test_event_categories() {
        assert_eq!(EventType::ControllerHeartbeat.category(), EventCategory::Controller);
        assert_eq!(EventType::MaglockReleased.category(), EventCategory::Safety);
        assert_eq!(EventType::HintUsed.category(), EventCategory::Gm);
    }

    #[test]
    fn test_serialize_wire_shape() {
        let event = state_change_event();
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "device_state_changed");
        assert_eq!(value["room_id"], "clockwork");
        assert_eq!(value["payload"]["command_acknowledged"], "power_on");
        assert!(value["payload"]["previous_state"].is_null());
        assert_eq!(value["metadata"]["is_acknowledgement"], true);
        assert!(value["metadata"].get("is_full_status").is_none());
        assert!(value.get("session_id").is_none());
    }

    #[test]
    fn test_deserialize_own_output() {
        let event = state_change_event();
        let json = serde_json::to_string(&event).unwrap();
        let decoded: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_deserialize_legacy_data_field() {
        let json = r#"{
            "event_id": "5f0c6b1e-8d4e-4c1a-9a8e-3f2b1c0d9e8f",
            "type": "puzzle_solved",
            "timestamp": "2024-03-01T12:00:00Z",
            "room_id": "clockwork",
            "puzzle_id": "gears",
            "data": {"solve_time_ms": 81234}
        }"#;
        let event: DomainEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type(), EventType::PuzzleSolved);
        assert_eq!(event.scope.puzzle_id.as_deref(), Some("gears"));
        match event.kind {
            EventKind::PuzzleSolved(attrs) => {
                assert_eq!(attrs.get("solve_time_ms"), Some(&json!(81234)));
            }
            other => panic!("Expected PuzzleSolved, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_missing_payload() {
        let json = r#"{
            "event_id": "5f0c6b1e-8d4e-4c1a-9a8e-3f2b1c0d9e8f",
            "type": "controller_online",
            "timestamp": "2024-03-01T12:00:00Z",
            "controller_id": "ctrl_a"
        }"#;
        let event: DomainEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event.kind, EventKind::ControllerOnline(ref a) if a.is_empty()));
        assert_eq!(event.metadata, EventMetadata::default());
    }

    #[test]
    fn test_deserialize_unknown_type_fails() {
        let json = r#"{
            "event_id": "5f0c6b1e-8d4e-4c1a-9a8e-3f2b1c0d9e8f",
            "type": "teleport_started",
            "timestamp": "2024-03-01T12:00:00Z"
        }"#;
        assert!(serde_json::from_str::<DomainEvent>(json).is_err());
    }
}
