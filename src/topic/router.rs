//! Topic Router
//!
//! Parses raw MQTT topic strings into structured coordinates. Parsing is
//! purely positional; the namespace segment is never validated so several
//! hardware fleets can share one broker.
//!
//! ```text
//! Registration:  sentient/system/register/{controller|device}
//! Operational:   <namespace>/<room_id>/<category>/<controller_id>[/<device_id>][/<message_kind>]
//! Controller-scoped status: <namespace>/<room_id>/status/<controller_id>/<message_kind>
//! ```

use std::fmt;
use thiserror::Error;

/// Topic on which controllers announce themselves
pub const CONTROLLER_REGISTRATION_TOPIC: &str = "sentient/system/register/controller";

/// Topic on which controllers announce their attached devices
pub const DEVICE_REGISTRATION_TOPIC: &str = "sentient/system/register/device";

/// Trailing segment marking a full-status response
pub const FULL_STATUS_MARKER: &str = "full";

/// Minimum segment count for any operational topic
const MIN_OPERATIONAL_SEGMENTS: usize = 4;

/// Acknowledgements must name controller, device and command
const MIN_ACK_SEGMENTS: usize = 6;

/// Message category, the third topic segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Commands,
    Sensors,
    Status,
    Acknowledgement,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Commands,
        Category::Sensors,
        Category::Status,
        Category::Acknowledgement,
    ];

    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "commands" => Some(Category::Commands),
            "sensors" => Some(Category::Sensors),
            "status" => Some(Category::Status),
            "acknowledgement" => Some(Category::Acknowledgement),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Commands => "commands",
            Category::Sensors => "sensors",
            Category::Status => "status",
            Category::Acknowledgement => "acknowledgement",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which registration announcement a topic carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    Controller,
    Device,
}

impl fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationKind::Controller => write!(f, "controller"),
            RegistrationKind::Device => write!(f, "device"),
        }
    }
}

/// Structured form of an operational topic
///
/// Recomputed for every message and discarded after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCoordinate {
    pub namespace: String,
    pub room_id: String,
    pub category: Category,
    pub controller_id: String,
    pub device_id: Option<String>,
    pub message_kind: Option<String>,
}

impl TopicCoordinate {
    /// True for `<ns>/<room>/status/<controller>/full` style topics
    pub fn is_full_status(&self) -> bool {
        self.category == Category::Status
            && self.message_kind.as_deref() == Some(FULL_STATUS_MARKER)
    }

    /// Device the message concerns, falling back to the controller itself
    pub fn effective_device_id(&self) -> &str {
        self.device_id.as_deref().unwrap_or(&self.controller_id)
    }
}

/// Result of routing a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedTopic {
    Registration(RegistrationKind),
    Operational(TopicCoordinate),
}

/// Why a topic could not be routed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// Looks like one of our topics but is missing required segments
    #[error("Malformed topic {topic}: {reason}")]
    Malformed { topic: String, reason: String },

    /// Unrelated traffic sharing the broker
    #[error("Unrecognized topic")]
    Unrecognized,
}

impl TopicError {
    fn malformed(topic: &str, reason: impl Into<String>) -> Self {
        TopicError::Malformed {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}

/// Route a raw topic string
pub fn route_topic(topic: &str) -> Result<RoutedTopic, TopicError> {
    match topic {
        CONTROLLER_REGISTRATION_TOPIC => {
            return Ok(RoutedTopic::Registration(RegistrationKind::Controller))
        }
        DEVICE_REGISTRATION_TOPIC => return Ok(RoutedTopic::Registration(RegistrationKind::Device)),
        _ => {}
    }

    parse_operational(topic).map(RoutedTopic::Operational)
}

/// Parse a category-first operational topic
pub fn parse_operational(topic: &str) -> Result<TopicCoordinate, TopicError> {
    let segments: Vec<&str> = topic.split('/').collect();

    let category = segments
        .get(2)
        .and_then(|s| Category::parse(s))
        .ok_or(TopicError::Unrecognized)?;

    if segments.len() < MIN_OPERATIONAL_SEGMENTS {
        return Err(TopicError::malformed(
            topic,
            format!("expected at least {} segments", MIN_OPERATIONAL_SEGMENTS),
        ));
    }
    if category == Category::Acknowledgement && segments.len() < MIN_ACK_SEGMENTS {
        return Err(TopicError::malformed(
            topic,
            format!("acknowledgements need {} segments", MIN_ACK_SEGMENTS),
        ));
    }

    let room_id = segments[1];
    let controller_id = segments[3];
    if room_id.is_empty() || controller_id.is_empty() {
        return Err(TopicError::malformed(topic, "empty room or controller segment"));
    }
    if category == Category::Status
        && segments.len() == MIN_OPERATIONAL_SEGMENTS
        && controller_id == FULL_STATUS_MARKER
    {
        return Err(TopicError::malformed(topic, "full status without controller"));
    }

    let segment = |i: usize| {
        segments
            .get(i)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    };

    // Status topics with five segments are scoped to the whole controller:
    // the fifth segment names the message, not a device.
    let (device_id, message_kind) = if category == Category::Status && segments.len() == 5 {
        (None, segment(4))
    } else {
        (segment(4), segment(5))
    };
    if category == Category::Acknowledgement && message_kind.is_none() {
        return Err(TopicError::malformed(topic, "acknowledgement without command"));
    }

    Ok(TopicCoordinate {
        namespace: segments[0].to_string(),
        room_id: room_id.to_string(),
        category,
        controller_id: controller_id.to_string(),
        device_id,
        message_kind,
    })
}
