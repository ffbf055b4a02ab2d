//! MQTT Topic Grammar
//!
//! - **router**: Positional parsing of inbound topics
//! - **builder**: Outbound command topics and subscription patterns

pub mod builder;
pub mod router;

pub use builder::{
    device_command_topic, status_request_topic, subscription_patterns, DEFAULT_NAMESPACES,
};
pub use router::{
    parse_operational, route_topic, Category, RegistrationKind, RoutedTopic, TopicCoordinate,
    TopicError, CONTROLLER_REGISTRATION_TOPIC, DEVICE_REGISTRATION_TOPIC, FULL_STATUS_MARKER,
};
