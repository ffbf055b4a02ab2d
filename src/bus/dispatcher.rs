//! Channel Dispatcher
//!
//! Fans each message received on a bus channel out to every handler
//! registered for that channel. Messages are decoded once per delivery and
//! shared between handlers. Handlers run concurrently; one failing or
//! panicking never affects the others or the dispatcher.

use futures_util::future::{join_all, BoxFuture};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::transport::{BusTransport, Result};

/// Result type returned by handlers
pub type HandlerResult = anyhow::Result<()>;

type Handler<M> = Arc<dyn Fn(Arc<M>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Identifies one `subscribe` call so it can be undone without touching
/// other handlers on the same channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    channel: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

struct ChannelEntry<M> {
    handlers: Vec<(u64, Handler<M>)>,
    pump: JoinHandle<()>,
}

struct Inner<M> {
    bus: Arc<dyn BusTransport>,
    channels: RwLock<HashMap<String, ChannelEntry<M>>>,
    next_id: AtomicU64,
}

/// Typed multi-handler dispatcher over a bus transport
pub struct Dispatcher<M> {
    inner: Arc<Inner<M>>,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for Dispatcher<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _message: PhantomData,
        }
    }
}

impl<M> Dispatcher<M>
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(bus: Arc<dyn BusTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                channels: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
            _message: PhantomData,
        }
    }

    /// Register a handler on a channel
    ///
    /// The first handler on a channel starts listening on the bus.
    pub async fn subscribe<F, Fut>(&self, channel: &str, handler: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler<M> =
            Arc::new(move |message: Arc<M>| -> BoxFuture<'static, HandlerResult> {
                Box::pin(handler(message))
            });
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.inner.channels.write().await;
        match channels.get_mut(channel) {
            Some(entry) => entry.handlers.push((id, handler)),
            None => {
                let rx = self.inner.bus.listen(channel).await?;
                let pump = tokio::spawn(pump(
                    Arc::downgrade(&self.inner),
                    channel.to_string(),
                    rx,
                ));
                channels.insert(
                    channel.to_string(),
                    ChannelEntry {
                        handlers: vec![(id, handler)],
                        pump,
                    },
                );
                info!(channel = %channel, "Listening on channel");
            }
        }

        Ok(SubscriptionHandle {
            channel: channel.to_string(),
            id,
        })
    }

    /// Remove the handler registered by one `subscribe` call
    ///
    /// Returns false if it was already removed.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut channels = self.inner.channels.write().await;
        let Some(entry) = channels.get_mut(&handle.channel) else {
            return false;
        };

        let before = entry.handlers.len();
        entry.handlers.retain(|(id, _)| *id != handle.id);
        let removed = entry.handlers.len() < before;

        if entry.handlers.is_empty() {
            if let Some(entry) = channels.remove(&handle.channel) {
                entry.pump.abort();
                debug!(channel = %handle.channel, "Stopped listening on channel");
            }
        }
        removed
    }

    /// Remove every handler on a channel, returning how many were removed
    pub async fn unsubscribe_channel(&self, channel: &str) -> usize {
        match self.inner.channels.write().await.remove(channel) {
            Some(entry) => {
                entry.pump.abort();
                debug!(channel = %channel, "Stopped listening on channel");
                entry.handlers.len()
            }
            None => 0,
        }
    }

    /// Deliver one raw message to the channel's handlers
    ///
    /// Returns the number of handlers invoked.
    pub async fn dispatch(&self, channel: &str, raw: &str) -> usize {
        self.inner.dispatch(channel, raw).await
    }

    pub async fn handler_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .read()
            .await
            .get(channel)
            .map(|entry| entry.handlers.len())
            .unwrap_or(0)
    }

    /// Drop every subscription
    pub async fn close(&self) {
        let mut channels = self.inner.channels.write().await;
        for (_, entry) in channels.drain() {
            entry.pump.abort();
        }
    }
}

impl<M> Inner<M>
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    async fn dispatch(&self, channel: &str, raw: &str) -> usize {
        let handlers: Vec<Handler<M>> = match self.channels.read().await.get(channel) {
            Some(entry) => entry.handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => Vec::new(),
        };
        if handlers.is_empty() {
            return 0;
        }

        let message = match serde_json::from_str::<M>(raw) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                warn!(channel = %channel, error = %e, "Failed to decode bus message");
                return 0;
            }
        };

        let count = handlers.len();
        let tasks = handlers
            .into_iter()
            .map(|handler| tokio::spawn(handler(message.clone())));

        for result in join_all(tasks).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(channel = %channel, error = %e, "Handler failed"),
                Err(e) => error!(channel = %channel, error = %e, "Handler panicked"),
            }
        }
        count
    }
}

/// Feeds messages from one bus listener into the dispatcher, in arrival order
async fn pump<M>(inner: Weak<Inner<M>>, channel: String, mut rx: mpsc::Receiver<String>)
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    while let Some(raw) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch(&channel, &raw).await;
    }
    debug!(channel = %channel, "Channel listener closed");
}
