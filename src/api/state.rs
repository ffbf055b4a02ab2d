//! Application State
//!
//! Shared state accessible by all handlers, wrapped in `Arc` by the router.

use std::sync::Arc;
use std::time::Instant;

use crate::bus::BusTransport;
use crate::config::RealtimeConfig;
use crate::realtime::ClientHub;

#[derive(Clone)]
pub struct AppState {
    /// Live WebSocket clients
    pub hub: Arc<ClientHub>,
    /// Bus the server listens on, pinged by the readiness probe
    pub bus: Arc<dyn BusTransport>,
    pub config: Arc<RealtimeConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: Arc<ClientHub>, bus: Arc<dyn BusTransport>, config: RealtimeConfig) -> Self {
        Self {
            hub,
            bus,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Socket address string to bind
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}
