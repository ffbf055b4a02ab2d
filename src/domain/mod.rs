//! Domain Model
//!
//! - **event**: The canonical domain event envelope and its closed set of kinds
//! - **liveness**: Online/offline classification derived from last-seen timestamps

pub mod event;
pub mod liveness;

pub use event::{
    Attributes, DomainEvent, EventCategory, EventKind, EventMetadata, EventScope, EventType,
    Fault, StateChange,
};
pub use liveness::{
    heartbeat_health, liveness, HeartbeatHealth, Liveness, DEFAULT_HEARTBEAT_INTERVAL_MS,
    LIVENESS_WINDOW_MS,
};
