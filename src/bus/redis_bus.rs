//! Redis pub/sub transport
//!
//! Publishes through a shared [`ConnectionManager`]; every listened channel
//! gets its own dedicated pub/sub connection and forwarding task.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::{aio::ConnectionManager, aio::PubSub, AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::transport::{BusError, BusTransport, Result};

/// Delay between attempts to re-establish a dropped subscription
const RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(1);

/// Redis-backed bus
pub struct RedisBus {
    client: Client,
    connection: ConnectionManager,
    listener_capacity: usize,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RedisBus {
    /// Connect to Redis
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect(url: &str, listener_capacity: usize) -> Result<Self> {
        info!("Connecting to Redis");

        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client.clone()).await?;

        info!("Connected to Redis");
        Ok(Self {
            client,
            connection,
            listener_capacity: listener_capacity.max(1),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

async fn open_pubsub(client: &Client, channel: &str) -> Result<PubSub> {
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Why a subscription stream stopped being pumped
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// The receiving side was dropped
    ListenerGone,
    /// The pub/sub connection ended
    Disconnected,
}

/// Pump payloads into `tx` until the stream ends or the receiver goes away
///
/// An idle stream is raced against `tx.closed()` so an unsubscribed listener
/// releases its connection without waiting for one more message.
async fn pump<S>(channel: &str, stream: S, tx: &mpsc::Sender<String>) -> StreamEnd
where
    S: Stream<Item = String>,
{
    tokio::pin!(stream);
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            next = stream.next() => match next {
                Some(payload) => {
                    if tx.send(payload).await.is_err() {
                        break;
                    }
                }
                None => return StreamEnd::Disconnected,
            },
        }
    }
    debug!(channel = %channel, "Listener dropped, leaving channel");
    StreamEnd::ListenerGone
}

/// Forward messages into `tx` until the receiver is dropped, resubscribing
/// at a fixed interval whenever the pub/sub connection is lost
async fn forward(client: Client, channel: String, mut pubsub: PubSub, tx: mpsc::Sender<String>) {
    loop {
        let payloads = pubsub.on_message().filter_map(|msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Failed to read message payload");
                    None
                }
            };
            futures_util::future::ready(payload)
        });
        if pump(&channel, payloads, &tx).await == StreamEnd::ListenerGone {
            return;
        }

        warn!(channel = %channel, "Subscription stream ended, resubscribing");
        loop {
            if tx.is_closed() {
                return;
            }
            tokio::select! {
                _ = tx.closed() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_INTERVAL) => {}
            }
            match open_pubsub(&client, &channel).await {
                Ok(fresh) => {
                    info!(channel = %channel, "Resubscribed");
                    pubsub = fresh;
                    break;
                }
                Err(e) => warn!(channel = %channel, error = %e, "Resubscribe failed"),
            }
        }
    }
}

#[async_trait]
impl BusTransport for RedisBus {
    #[instrument(skip(self, payload))]
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.ensure_open()?;

        let mut conn = self.connection.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;

        debug!(receivers, "Message published");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn listen(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        self.ensure_open()?;

        let pubsub = open_pubsub(&self.client, channel).await?;
        let (tx, rx) = mpsc::channel(self.listener_capacity);

        let handle = tokio::spawn(forward(
            self.client.clone(),
            channel.to_string(),
            pubsub,
            tx,
        ));

        let mut listeners = self.listeners.lock().await;
        listeners.retain(|handle| !handle.is_finished());
        listeners.push(handle);

        debug!("Subscribed to channel");
        Ok(rx)
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;

        let mut conn = self.connection.clone();
        let reply = redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(BusError::UnexpectedReply(reply))
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let listeners: Vec<_> = self.listeners.lock().await.drain(..).collect();
        for handle in &listeners {
            handle.abort();
        }
        info!(listeners = listeners.len(), "Redis bus closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn test_pump_forwards_until_stream_ends() {
        let (tx, mut rx) = mpsc::channel(4);
        let messages = stream::iter(vec!["a".to_string(), "b".to_string()]);

        assert_eq!(pump("events", messages, &tx).await, StreamEnd::Disconnected);
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_idle_pump_stops_when_listener_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let pumping = tokio::spawn(async move {
            pump("events", stream::pending::<String>(), &tx).await
        });

        drop(rx);
        let end = tokio::time::timeout(Duration::from_secs(1), pumping)
            .await
            .expect("pump should notice the dropped listener")
            .unwrap();
        assert_eq!(end, StreamEnd::ListenerGone);
    }
}
