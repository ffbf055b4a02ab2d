//! Client Hub
//!
//! Registry of live WebSocket clients and their room memberships. Room
//! membership lives only on the client record, so disconnecting needs no
//! further cleanup.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::messages::ServerMessage;
use crate::domain::DomainEvent;

/// Unique identifier for a WebSocket client
pub type ClientId = String;

/// Serialized frames queued for one client
pub type Outbox = mpsc::UnboundedSender<String>;

/// Configuration for the client hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent clients
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
        }
    }
}

struct ClientHandle {
    outbox: Outbox,
    rooms: HashSet<String>,
}

/// Snapshot logged by the stats task and reported by `/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub total_clients: usize,
    /// Distinct rooms with at least one member
    pub rooms: Vec<String>,
}

pub struct ClientHub {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    config: HubConfig,
}

/// Room id named by a channel such as `gm:room:clockwork`
pub fn extract_room_id(channel: &str) -> Option<&str> {
    static ROOM: OnceLock<Option<Regex>> = OnceLock::new();
    let re = ROOM.get_or_init(|| Regex::new(r"room:([^:]+)").ok()).as_ref()?;
    re.captures(channel)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            error!(error = %e, "Failed to serialize message");
            None
        }
    }
}

impl ClientHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a client, returning its id, unless the hub is full
    pub async fn register(&self, outbox: Outbox) -> Result<ClientId, HubError> {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        clients.insert(
            id.clone(),
            ClientHandle {
                outbox,
                rooms: HashSet::new(),
            },
        );

        info!(client_id = %id, "Client connected");
        Ok(id)
    }

    pub async fn unregister(&self, id: &str) {
        if self.clients.write().await.remove(id).is_some() {
            info!(client_id = %id, "Client disconnected");
        }
    }

    /// Join the rooms named by `channels`, returning the room ids found
    ///
    /// Channels that name no room are ignored.
    pub async fn subscribe(&self, id: &str, channels: &[String]) -> Result<Vec<String>, HubError> {
        let mut clients = self.clients.write().await;
        let client = clients.get_mut(id).ok_or(HubError::ClientNotFound)?;

        let rooms: Vec<String> = channels
            .iter()
            .filter_map(|channel| extract_room_id(channel))
            .map(str::to_string)
            .collect();
        for room in &rooms {
            client.rooms.insert(room.clone());
            debug!(client_id = %id, room_id = %room, "Client subscribed to room");
        }
        Ok(rooms)
    }

    /// Leave the rooms named by `channels`, returning the room ids left
    pub async fn unsubscribe(&self, id: &str, channels: &[String]) -> Result<Vec<String>, HubError> {
        let mut clients = self.clients.write().await;
        let client = clients.get_mut(id).ok_or(HubError::ClientNotFound)?;

        let left = channels
            .iter()
            .filter_map(|channel| extract_room_id(channel))
            .filter(|room| client.rooms.remove(*room))
            .map(str::to_string)
            .collect();
        Ok(left)
    }

    pub async fn send_to(&self, id: &str, message: &ServerMessage) -> Result<(), HubError> {
        let text = encode(message).ok_or(HubError::SendFailed)?;
        let clients = self.clients.read().await;
        let client = clients.get(id).ok_or(HubError::ClientNotFound)?;
        client.outbox.send(text).map_err(|_| HubError::SendFailed)
    }

    /// Send to every member of a room, returning how many were reached
    pub async fn broadcast_to_room(&self, room_id: &str, message: &ServerMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };

        let clients = self.clients.read().await;
        let sent = clients
            .values()
            .filter(|client| client.rooms.contains(room_id))
            .filter(|client| client.outbox.send(text.clone()).is_ok())
            .count();

        debug!(room_id = %room_id, client_count = sent, "Broadcast to room");
        sent
    }

    /// Send to every client, returning how many were reached
    pub async fn broadcast_to_all(&self, message: &ServerMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };

        let clients = self.clients.read().await;
        let sent = clients
            .values()
            .filter(|client| client.outbox.send(text.clone()).is_ok())
            .count();

        debug!(client_count = sent, "Broadcast to all");
        sent
    }

    /// Push a domain event to its room's members, then to everyone
    ///
    /// Room members receive both copies.
    pub async fn deliver(&self, event: &DomainEvent) -> Delivery {
        let room = match event.room_id() {
            Some(room_id) => {
                self.broadcast_to_room(room_id, &ServerMessage::room_event(event))
                    .await
            }
            None => 0,
        };
        let global = self.broadcast_to_all(&ServerMessage::global_event(event)).await;

        Delivery { room, global }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn stats(&self) -> HubStats {
        let clients = self.clients.read().await;
        let rooms: BTreeSet<&String> = clients.values().flat_map(|c| c.rooms.iter()).collect();

        HubStats {
            total_clients: clients.len(),
            rooms: rooms.into_iter().cloned().collect(),
        }
    }

    /// Drop every client; their send loops end and the sockets close
    pub async fn close(&self) {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        clients.clear();
        info!(clients = count, "Client hub closed");
    }

    /// Log stats periodically until the hub is dropped
    pub fn spawn_stats_logger(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let hub: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                let stats = hub.stats().await;
                info!(
                    total_clients = stats.total_clients,
                    rooms = ?stats.rooms,
                    "WebSocket stats"
                );
            }
        })
    }
}

/// How many clients received each copy of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub room: usize,
    pub global: usize,
}

/// Errors that can occur in the client hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Client not found")]
    ClientNotFound,

    #[error("Failed to send message")]
    SendFailed,
}
