//! Bus transport abstraction

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a bus transport
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected reply from bus: {0}")]
    UnexpectedReply(String),

    #[error("Bus connection is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Pub/sub transport carrying serialized messages between services
///
/// Delivery is whatever the underlying transport offers: at most once per
/// subscriber, to every subscriber listening at publish time.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Publish one serialized message
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Start listening on a channel
    ///
    /// The receiver closes when the transport is closed.
    async fn listen(&self, channel: &str) -> Result<mpsc::Receiver<String>>;

    /// Round-trip check used by readiness probes
    async fn ping(&self) -> Result<()>;

    /// Stop all listeners and reject further publishes
    async fn close(&self);
}
