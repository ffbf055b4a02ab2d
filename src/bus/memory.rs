//! In-process bus transport
//!
//! Backs single-process deployments and tests. A bus built with
//! [`MemoryBus::recording`] also keeps every publish so callers can inspect
//! exactly what went out and in which order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use super::transport::{BusError, BusTransport, Result};

const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast-channel bus living inside one process
pub struct MemoryBus {
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
    /// Publish history, only kept by recording buses
    published: Option<Mutex<Vec<(String, String)>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            published: None,
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// A bus that remembers every publish, for inspection in tests
    pub fn recording() -> Self {
        Self {
            published: Some(Mutex::new(Vec::new())),
            ..Self::default()
        }
    }

    pub fn is_recording(&self) -> bool {
        self.published.is_some()
    }

    /// Every `(channel, payload)` published so far, in publish order
    ///
    /// Always empty unless the bus was built with [`MemoryBus::recording`].
    pub async fn published(&self) -> Vec<(String, String)> {
        match &self.published {
            Some(published) => published.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Channels published to so far, in publish order
    pub async fn published_channels(&self) -> Vec<String> {
        self.published()
            .await
            .into_iter()
            .map(|(channel, _)| channel)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusTransport for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        if let Some(published) = &self.published {
            published
                .lock()
                .await
                .push((channel.to_string(), payload.to_string()));
        }

        if let Some(sender) = self.channels.read().await.get(channel) {
            // No receivers is not an error on a pub/sub bus
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn listen(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let mut subscription = {
            let mut channels = self.channels.write().await;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let (tx, rx) = mpsc::channel(self.capacity);
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "Listener lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(channel = %channel, "Memory listener finished");
        });

        Ok(rx)
    }

    async fn ping(&self) -> Result<()> {
        if self.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders ends every forwarding task
        self.channels.write().await.clear();
    }
}
