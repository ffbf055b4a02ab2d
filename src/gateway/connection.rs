//! Broker connection state
//!
//! `Disconnected -> Connecting -> Connected -> (Reconnecting -> Connected)* -> Disconnected`

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Inputs driving the connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The event loop started
    Start,
    /// The broker accepted the connection
    ConnAck,
    /// The transport reported an error
    Error,
    Shutdown,
}

impl ConnectionState {
    /// Next state after an event
    pub fn next(self, event: ConnectionEvent) -> Self {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (_, E::Shutdown) => S::Disconnected,
            (S::Disconnected, E::Start) => S::Connecting,
            (S::Disconnected, _) => S::Disconnected,
            (_, E::ConnAck) => S::Connected,
            (S::Connecting, E::Error) => S::Connecting,
            (S::Connected | S::Reconnecting, E::Error) => S::Reconnecting,
            (state, E::Start) => state,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Publishes connection state changes to any number of observers
pub struct ConnectionMonitor {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Apply an event, returning the resulting state
    pub fn apply(&self, event: ConnectionEvent) -> ConnectionState {
        let current = *self.tx.borrow();
        let next = current.next(event);
        if next != current {
            info!(from = %current, to = %next, "MQTT connection state changed");
            self.tx.send_replace(next);
        }
        next
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
