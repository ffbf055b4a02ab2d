//! MQTT Ingestion Gateway
//!
//! Bridges the hardware broker and the event bus in both directions.
//!
//! - **processor**: Per-message route/decode/normalize/publish pipeline
//! - **commands**: Bus commands resolved to MQTT command topics
//! - **client**: Internal API client for registration and action lookup
//! - **actions**: TTL cache of device action labels
//! - **connection**: Broker connection state machine

pub mod actions;
pub mod client;
pub mod commands;
pub mod connection;
pub mod processor;

pub use actions::ActionCatalog;
pub use client::{
    ActionSource, DeviceAction, InternalApiClient, Registrar, RegistrationError, TOKEN_HEADER,
};
pub use commands::{
    bridge_commands, CommandError, CommandRouter, CommandSink, DeviceCommand, GenericCommand,
    OutboundMessage, PowerAction, PowerCommand, StatusRequest,
};
pub use connection::{ConnectionEvent, ConnectionMonitor, ConnectionState};
pub use processor::{MessageProcessor, Outcome};

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, BusTransport, Dispatcher, EventPublisher};
use crate::config::{Config, ConfigError};
use crate::normalize::Normalizer;
use crate::topic::subscription_patterns;

/// How long shutdown waits for the broker to see our DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// How long shutdown waits for messages already being processed
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Errors starting or running the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registration client error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// The ingestion service: MQTT in, domain events out, bus commands back
pub struct IngestionGateway {
    config: Config,
    processor: Arc<MessageProcessor>,
    commands: CommandRouter,
    dispatcher: Dispatcher<Value>,
    bus: Arc<dyn BusTransport>,
    actions: Arc<ActionCatalog>,
    state: ConnectionMonitor,
}

impl IngestionGateway {
    /// Build the gateway from a configuration already checked with
    /// [`Config::validate_gateway`]
    pub fn new(config: Config, bus: Arc<dyn BusTransport>) -> Result<Self> {
        let api = Arc::new(InternalApiClient::from_config(&config.registration)?);
        let registration = &config.registration;
        let actions = Arc::new(ActionCatalog::new(
            api.clone(),
            Duration::from_secs(registration.action_cache_ttl_secs),
            registration.action_cache_capacity,
        ));

        let processor = Arc::new(MessageProcessor::new(
            Normalizer::default(),
            EventPublisher::new(bus.clone()),
            api,
            actions.clone(),
        ));

        Ok(Self {
            commands: CommandRouter::new(config.mqtt.command_namespace.clone()),
            dispatcher: Dispatcher::new(bus.clone()),
            config,
            processor,
            bus,
            actions,
            state: ConnectionMonitor::new(),
        })
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn mqtt_options(&self) -> Result<MqttOptions> {
        let mqtt = &self.config.mqtt;
        let (host, port) = mqtt.broker()?;

        let mut options = MqttOptions::new(mqtt.client_id(), host, port);
        options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(username) = &mqtt.username {
            options.set_credentials(username, mqtt.password.clone().unwrap_or_default());
        }
        Ok(options)
    }

    /// Run until `shutdown` resolves, then disconnect in order: broker,
    /// in-flight messages, command subscriptions, bus
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let options = self.mqtt_options()?;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.mqtt.request_capacity);
        self.state.apply(ConnectionEvent::Start);

        let purge = self.actions.spawn_purge(Duration::from_secs(
            self.config.registration.action_cache_purge_secs.max(1),
        ));

        bridge_commands(
            &self.dispatcher,
            self.commands.clone(),
            Arc::new(client.clone()),
        )
        .await?;

        info!(
            url = %self.config.mqtt.url,
            namespaces = ?self.config.mqtt.namespaces,
            "Ingestion gateway started"
        );

        tokio::pin!(shutdown);
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Message task failed");
                    }
                }
                polled = eventloop.poll() => match polled {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        self.state.apply(ConnectionEvent::ConnAck);
                        tokio::spawn(subscribe_all(client.clone(), self.config.mqtt.namespaces.clone()));
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let processor = self.processor.clone();
                        in_flight.spawn(async move {
                            processor.handle(&publish.topic, &publish.payload).await;
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error, retrying");
                        self.state.apply(ConnectionEvent::Error);
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(self.config.mqtt.reconnect_interval()) => {}
                        }
                    }
                },
            }
        }

        info!("Shutting down ingestion gateway");
        disconnect(&client, &mut eventloop).await;
        drain_in_flight(&mut in_flight, DRAIN_GRACE).await;
        self.dispatcher.close().await;
        self.bus.close().await;
        purge.abort();
        self.state.apply(ConnectionEvent::Shutdown);
        info!("Ingestion gateway stopped");

        Ok(())
    }
}

/// Subscribe every pattern, logging failures without aborting the rest
async fn subscribe_all(client: AsyncClient, namespaces: Vec<String>) {
    let patterns = subscription_patterns(&namespaces);
    for pattern in &patterns {
        if let Err(e) = client.subscribe(pattern.as_str(), QoS::AtLeastOnce).await {
            error!(pattern = %pattern, error = %e, "Failed to subscribe");
        }
    }
    info!(patterns = patterns.len(), "Subscribed to MQTT topics");
}

/// Wait for message tasks to finish, aborting whatever is left after `grace`
async fn drain_in_flight(tasks: &mut JoinSet<()>, grace: Duration) {
    if tasks.is_empty() {
        return;
    }

    let pending = tasks.len();
    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    match drained {
        Ok(()) => debug!(pending, "In-flight messages drained"),
        Err(_) => {
            warn!(remaining = tasks.len(), "In-flight messages did not finish in time, aborting");
            tasks.abort_all();
        }
    }
}

async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "Disconnect request not queued");
        return;
    }

    let drained = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!("Broker did not acknowledge disconnect in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::topic::RegistrationKind;
    use async_trait::async_trait;
    use tokio::time::Instant;

    /// Action lookups that take a while to answer
    struct SlowApi {
        delay: Duration,
    }

    #[async_trait]
    impl Registrar for SlowApi {
        async fn register(&self, _kind: RegistrationKind, _body: &Value) -> std::result::Result<(), RegistrationError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ActionSource for SlowApi {
        async fn device_actions(&self, _device_id: &str) -> std::result::Result<Vec<DeviceAction>, RegistrationError> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![])
        }
    }

    fn slow_processor(bus: Arc<MemoryBus>, delay: Duration) -> Arc<MessageProcessor> {
        let api = Arc::new(SlowApi { delay });
        let actions = Arc::new(ActionCatalog::new(api.clone(), Duration::from_secs(60), 10));
        Arc::new(MessageProcessor::new(
            Normalizer::default(),
            EventPublisher::new(bus),
            api,
            actions,
        ))
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.registration.internal_token = Some("x".repeat(32));
        config
    }

    #[test]
    fn test_new_requires_token() {
        let bus: Arc<dyn BusTransport> = Arc::new(MemoryBus::default());
        let err = IngestionGateway::new(Config::default(), bus).err().unwrap();
        assert!(matches!(
            err,
            GatewayError::Registration(RegistrationError::MissingToken)
        ));
    }

    #[test]
    fn test_mqtt_options_from_config() {
        let mut config = config();
        config.mqtt.url = "mqtt://broker.local:1884".to_string();
        config.mqtt.username = Some("gw".to_string());

        let bus: Arc<dyn BusTransport> = Arc::new(MemoryBus::default());
        let gateway = IngestionGateway::new(config, bus).unwrap();
        let options = gateway.mqtt_options().unwrap();

        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert!(options.client_id().starts_with("mqtt-gateway-"));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert_eq!(*gateway.connection_state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_without_broker_closes_bus() {
        let mut config = config();
        // Nothing listens here; the loop only sees connection errors
        config.mqtt.url = "mqtt://127.0.0.1:1".to_string();
        config.mqtt.reconnect_interval_ms = 10;

        let bus = Arc::new(MemoryBus::default());
        let gateway = IngestionGateway::new(config, bus.clone()).unwrap();
        let state = gateway.connection_state();

        gateway
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(bus.is_closed());
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_not_delayed_by_reconnect_wait() {
        let mut config = config();
        config.mqtt.url = "mqtt://127.0.0.1:1".to_string();
        config.mqtt.reconnect_interval_ms = 60_000;

        let bus = Arc::new(MemoryBus::default());
        let gateway = IngestionGateway::new(config, bus.clone()).unwrap();

        let started = Instant::now();
        gateway
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn test_in_flight_message_published_before_bus_closes() {
        let bus = Arc::new(MemoryBus::recording());
        let processor = slow_processor(bus.clone(), Duration::from_millis(200));

        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            let outcome = processor
                .handle("paragon/r/acknowledgement/c/d/power_on", b"{}")
                .await;
            assert_eq!(outcome, Outcome::Published { events: 1, failed: 0 });
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drain_in_flight(&mut tasks, Duration::from_secs(2)).await;
        bus.close().await;

        assert!(tasks.is_empty());
        assert_eq!(
            bus.published_channels().await,
            vec!["sentient:events:domain", "sentient:events:room:r"]
        );
    }

    #[tokio::test]
    async fn test_drain_aborts_after_grace() {
        let bus = Arc::new(MemoryBus::recording());
        let processor = slow_processor(bus.clone(), Duration::from_secs(30));

        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            processor
                .handle("paragon/r/acknowledgement/c/d/power_on", b"{}")
                .await;
        });

        let started = Instant::now();
        drain_in_flight(&mut tasks, Duration::from_millis(50)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(bus.published().await.is_empty());
    }
}
