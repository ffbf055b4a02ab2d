//! Payload Normalization
//!
//! - **payload**: Tagged decode of raw bytes into the known payload shapes
//! - **normalizer**: Policy turning decoded payloads into domain events

pub mod normalizer;
pub mod payload;

pub use normalizer::{
    command_label, event_time, Normalizer, FULL_STATUS_METADATA_KEYS, GATEWAY_SOURCE,
};
pub use payload::{decode, InboundPayload, PayloadError, ONLINE_SENTINEL};
