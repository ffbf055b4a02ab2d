//! Outbound topics and subscription patterns

use super::router::{Category, CONTROLLER_REGISTRATION_TOPIC, DEVICE_REGISTRATION_TOPIC};

/// Namespaces the gateway listens on when none are configured
pub const DEFAULT_NAMESPACES: [&str; 2] = ["sentient", "paragon"];

/// MQTT subscription patterns for the given hardware namespaces
///
/// Registration topics come first, followed by one wildcard per
/// namespace and category.
pub fn subscription_patterns<S: AsRef<str>>(namespaces: &[S]) -> Vec<String> {
    let mut patterns = vec![
        CONTROLLER_REGISTRATION_TOPIC.to_string(),
        DEVICE_REGISTRATION_TOPIC.to_string(),
    ];
    for namespace in namespaces {
        for category in Category::ALL {
            patterns.push(format!("{}/+/{}/#", namespace.as_ref(), category));
        }
    }
    patterns
}

/// Topic addressing a command to one device
pub fn device_command_topic(
    namespace: &str,
    room_id: &str,
    controller_id: &str,
    device_id: &str,
    command: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}/{}",
        namespace,
        room_id,
        Category::Commands,
        controller_id,
        device_id,
        command
    )
}

/// Topic asking a controller to report its full status
pub fn status_request_topic(namespace: &str, room_id: &str, controller_id: &str) -> String {
    format!(
        "{}/{}/{}/{}/controller/request_status",
        namespace,
        room_id,
        Category::Commands,
        controller_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::router::{route_topic, RoutedTopic};

    #[test]
    fn test_subscription_patterns() {
        let patterns = subscription_patterns(&DEFAULT_NAMESPACES);
        assert_eq!(patterns.len(), 10);
        assert_eq!(patterns[0], "sentient/system/register/controller");
        assert!(patterns.contains(&"paragon/+/acknowledgement/#".to_string()));
        assert!(patterns.contains(&"sentient/+/sensors/#".to_string()));
    }

    #[test]
    fn test_device_command_topic_routes_back() {
        let topic = device_command_topic("paragon", "clockwork", "ctrl", "relay", "power_on");
        assert_eq!(topic, "paragon/clockwork/commands/ctrl/relay/power_on");

        match route_topic(&topic).unwrap() {
            RoutedTopic::Operational(c) => {
                assert_eq!(c.device_id.as_deref(), Some("relay"));
                assert_eq!(c.message_kind.as_deref(), Some("power_on"));
            }
            other => panic!("Expected operational topic, got {:?}", other),
        }
    }

    #[test]
    fn test_status_request_topic() {
        assert_eq!(
            status_request_topic("paragon", "clockwork", "ctrl"),
            "paragon/clockwork/commands/ctrl/controller/request_status"
        );
    }
}
