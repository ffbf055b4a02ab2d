//! Bus channel names
//!
//! Channel names are derived, never stored. The fixed names and templates
//! below are the contract shared with every other service on the bus.

use std::fmt;

const PREFIX: &str = "sentient";

/// A pub/sub channel on the event bus
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Every domain event
    DomainEvents,
    Room(String),
    Session(String),
    Controller(String),
    Device(String),
    /// Game-master commands
    GmCommands,
    /// Device power commands headed for hardware
    DeviceCommands,
    /// Arbitrary device commands headed for hardware
    DeviceGenericCommands,
    /// Full-status requests headed for controllers
    StatusRequests,
    RealtimeBroadcast,
    RealtimeRoom(String),
}

impl Channel {
    pub fn room(room_id: impl Into<String>) -> Self {
        Channel::Room(room_id.into())
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Channel::Session(session_id.into())
    }

    pub fn controller(controller_id: impl Into<String>) -> Self {
        Channel::Controller(controller_id.into())
    }

    pub fn device(device_id: impl Into<String>) -> Self {
        Channel::Device(device_id.into())
    }

    /// Full channel name as used on the wire
    pub fn name(&self) -> String {
        match self {
            Channel::DomainEvents => format!("{}:events:domain", PREFIX),
            Channel::Room(id) => format!("{}:events:room:{}", PREFIX, id),
            Channel::Session(id) => format!("{}:events:session:{}", PREFIX, id),
            Channel::Controller(id) => format!("{}:events:controller:{}", PREFIX, id),
            Channel::Device(id) => format!("{}:events:device:{}", PREFIX, id),
            Channel::GmCommands => format!("{}:commands:gm", PREFIX),
            Channel::DeviceCommands => format!("{}:commands:device", PREFIX),
            Channel::DeviceGenericCommands => format!("{}:commands:device_generic", PREFIX),
            Channel::StatusRequests => format!("{}:commands:status_request", PREFIX),
            Channel::RealtimeBroadcast => format!("{}:realtime:broadcast", PREFIX),
            Channel::RealtimeRoom(id) => format!("{}:realtime:room:{}", PREFIX, id),
        }
    }

    /// Parse a fixed or templated channel name
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(PREFIX)?.strip_prefix(':')?;
        let templated = |prefix: &str| {
            rest.strip_prefix(prefix)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        };

        match rest {
            "events:domain" => return Some(Channel::DomainEvents),
            "commands:gm" => return Some(Channel::GmCommands),
            "commands:device" => return Some(Channel::DeviceCommands),
            "commands:device_generic" => return Some(Channel::DeviceGenericCommands),
            "commands:status_request" => return Some(Channel::StatusRequests),
            "realtime:broadcast" => return Some(Channel::RealtimeBroadcast),
            _ => {}
        }

        templated("events:room:")
            .map(Channel::Room)
            .or_else(|| templated("events:session:").map(Channel::Session))
            .or_else(|| templated("events:controller:").map(Channel::Controller))
            .or_else(|| templated("events:device:").map(Channel::Device))
            .or_else(|| templated("realtime:room:").map(Channel::RealtimeRoom))
    }

    /// Channels the gateway listens on for the hardware-bound reverse path
    pub fn hardware_commands() -> [Channel; 3] {
        [
            Channel::DeviceCommands,
            Channel::DeviceGenericCommands,
            Channel::StatusRequests,
        ]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_names() {
        assert_eq!(Channel::DomainEvents.name(), "sentient:events:domain");
        assert_eq!(Channel::DeviceCommands.name(), "sentient:commands:device");
        assert_eq!(
            Channel::DeviceGenericCommands.name(),
            "sentient:commands:device_generic"
        );
        assert_eq!(Channel::StatusRequests.name(), "sentient:commands:status_request");
        assert_eq!(Channel::GmCommands.name(), "sentient:commands:gm");
        assert_eq!(Channel::RealtimeBroadcast.name(), "sentient:realtime:broadcast");
    }

    #[test]
    fn test_templated_names() {
        assert_eq!(Channel::room("clockwork").name(), "sentient:events:room:clockwork");
        assert_eq!(Channel::session("s-1").name(), "sentient:events:session:s-1");
        assert_eq!(Channel::controller("c").to_string(), "sentient:events:controller:c");
        assert_eq!(Channel::device("d").to_string(), "sentient:events:device:d");
        assert_eq!(
            Channel::RealtimeRoom("r".to_string()).name(),
            "sentient:realtime:room:r"
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(Channel::parse("sentient:events:domain"), Some(Channel::DomainEvents));
        assert_eq!(
            Channel::parse("sentient:events:room:clockwork"),
            Some(Channel::room("clockwork"))
        );
        assert_eq!(
            Channel::parse("sentient:commands:device_generic"),
            Some(Channel::DeviceGenericCommands)
        );
        assert_eq!(Channel::parse("sentient:events:room:"), None);
        assert_eq!(Channel::parse("other:events:domain"), None);
    }
}
