//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides using the
//! deployment's variable names (`MQTT_URL`, `REDIS_URL`, ...).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Tokens shorter than this are accepted with a warning
const MIN_TOKEN_LENGTH: usize = 32;

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub registration: RegistrationConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MQTT broker connection
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_url")]
    pub url: String,

    /// Client IDs are `<prefix>-<epoch ms>` so restarts never collide
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Fixed delay between reconnect attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Hardware namespaces to subscribe to
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,

    /// Namespace outbound commands are published under
    #[serde(default = "default_command_namespace")]
    pub command_namespace: String,

    /// Capacity of the client's outgoing request queue
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_mqtt_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_client_id_prefix() -> String {
    "mqtt-gateway".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_reconnect_interval() -> u64 {
    1000
}

fn default_namespaces() -> Vec<String> {
    crate::topic::DEFAULT_NAMESPACES
        .iter()
        .map(|ns| ns.to_string())
        .collect()
}

fn default_command_namespace() -> String {
    "paragon".to_string()
}

fn default_request_capacity() -> usize {
    100
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: default_mqtt_url(),
            client_id_prefix: default_client_id_prefix(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_interval_ms: default_reconnect_interval(),
            namespaces: default_namespaces(),
            command_namespace: default_command_namespace(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl MqttConfig {
    /// Broker host and port parsed from the URL
    pub fn broker(&self) -> Result<(String, u16), ConfigError> {
        let url = Url::parse(&self.url).map_err(|e| ConfigError::Invalid {
            field: "mqtt.url",
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "mqtt" | "tcp" => {}
            other => {
                return Err(ConfigError::Invalid {
                    field: "mqtt.url",
                    reason: format!("unsupported scheme '{}'", other),
                })
            }
        }

        let host = url.host_str().ok_or_else(|| ConfigError::Invalid {
            field: "mqtt.url",
            reason: "missing host".to_string(),
        })?;

        Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
    }

    pub fn client_id(&self) -> String {
        format!(
            "{}-{}",
            self.client_id_prefix,
            chrono::Utc::now().timestamp_millis()
        )
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Which bus transport to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    #[default]
    Redis,
    /// In-process bus, for running gateway and realtime server in one process
    Memory,
}

/// Event bus connection
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub backend: BusBackend,

    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Buffered messages per listened channel
    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_listener_capacity() -> usize {
    256
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            url: default_redis_url(),
            listener_capacity: default_listener_capacity(),
        }
    }
}

/// Internal registration API
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Shared secret sent as `x-internal-token`
    #[serde(default)]
    pub internal_token: Option<String>,

    #[serde(default = "default_registration_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_action_cache_ttl")]
    pub action_cache_ttl_secs: u64,

    #[serde(default = "default_action_cache_capacity")]
    pub action_cache_capacity: usize,

    #[serde(default = "default_action_cache_purge")]
    pub action_cache_purge_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_registration_timeout() -> u64 {
    5000
}

fn default_action_cache_ttl() -> u64 {
    60 * 60
}

fn default_action_cache_capacity() -> usize {
    1000
}

fn default_action_cache_purge() -> u64 {
    5 * 60
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            internal_token: None,
            timeout_ms: default_registration_timeout(),
            action_cache_ttl_secs: default_action_cache_ttl(),
            action_cache_capacity: default_action_cache_capacity(),
            action_cache_purge_secs: default_action_cache_purge(),
        }
    }
}

impl RegistrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Realtime WebSocket server
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_max_connections() -> usize {
    1000
}

fn default_stats_interval() -> u64 {
    30
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    ///
    /// Nothing is logged here; call [`LoadedConfig::log_source`] once
    /// logging is up.
    pub fn load_default() -> LoadedConfig {
        let candidates: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("roomwire").join("config.toml")),
            Some(PathBuf::from("/etc/roomwire/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&candidates)
    }

    /// Load the first candidate file that exists and parses
    pub fn load_first(candidates: &[PathBuf]) -> LoadedConfig {
        let mut rejected = Vec::new();

        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    return LoadedConfig {
                        config,
                        source: ConfigSource::File(path.clone()),
                        rejected,
                    }
                }
                Err(e) => rejected.push((path.clone(), e.to_string())),
            }
        }

        LoadedConfig {
            config: Self::from_env(),
            source: ConfigSource::Environment,
            rejected,
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // MQTT overrides
        if let Some(url) = var("MQTT_URL") {
            self.mqtt.url = url;
        }
        if let Some(username) = var("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = var("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }

        // Bus overrides
        if let Some(url) = var("REDIS_URL") {
            self.bus.url = url;
        }

        // Registration overrides
        if let Some(url) = var("API_URL") {
            self.registration.api_url = url;
        }
        if let Some(token) = var("INTERNAL_REG_TOKEN") {
            self.registration.internal_token = Some(token);
        }

        // Realtime overrides
        if let Some(host) = var("WS_HOST") {
            self.realtime.host = host;
        }
        if let Some(port) = var("WS_PORT") {
            if let Ok(p) = port.parse() {
                self.realtime.port = p;
            }
        }

        // Logging overrides
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check everything the ingestion gateway needs before it starts
    ///
    /// A missing registration token is fatal.
    pub fn validate_gateway(&self) -> Result<(), ConfigError> {
        let token = self
            .registration
            .internal_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        if token.len() < MIN_TOKEN_LENGTH {
            tracing::warn!(
                length = token.len(),
                "INTERNAL_REG_TOKEN is shorter than {} characters",
                MIN_TOKEN_LENGTH
            );
        }

        Url::parse(&self.registration.api_url).map_err(|e| ConfigError::Invalid {
            field: "registration.api_url",
            reason: e.to_string(),
        })?;
        self.mqtt.broker()?;

        if self.mqtt.namespaces.is_empty() {
            return Err(ConfigError::Invalid {
                field: "mqtt.namespaces",
                reason: "at least one namespace is required".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("INTERNAL_REG_TOKEN is not set")]
    MissingToken,
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Roomwire Configuration
#
# Environment variables override these settings:
# - MQTT_URL, MQTT_USERNAME, MQTT_PASSWORD
# - REDIS_URL
# - API_URL, INTERNAL_REG_TOKEN
# - WS_HOST, WS_PORT
# - LOG_LEVEL, LOG_FORMAT

[mqtt]
# Broker URL (mqtt:// or tcp://)
url = "mqtt://localhost:1883"

# Client ID prefix, suffixed with the start time
client_id_prefix = "mqtt-gateway"

# Optional broker credentials
# username = ""
# password = ""

# Keep-alive interval (seconds)
keep_alive_secs = 30

# Fixed delay between reconnect attempts (ms)
reconnect_interval_ms = 1000

# Hardware namespaces to listen on
namespaces = ["sentient", "paragon"]

# Namespace outbound commands are published under
command_namespace = "paragon"

# Outgoing request queue size
request_capacity = 100

[bus]
# Transport: redis or memory
backend = "redis"

# Redis URL
url = "redis://localhost:6379"

# Buffered messages per subscribed channel
listener_capacity = 256

[registration]
# Internal API base URL
api_url = "http://localhost:3000"

# Shared secret for the internal API (required by the gateway)
# internal_token = ""

# Request timeout (ms)
timeout_ms = 5000

# Device action label cache
action_cache_ttl_secs = 3600
action_cache_capacity = 1000
action_cache_purge_secs = 300

[realtime]
# WebSocket server host
host = "0.0.0.0"

# WebSocket server port
port = 3002

# Maximum concurrent WebSocket clients
max_connections = 1000

# How often to log connection stats (seconds)
stats_interval_secs = 30

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

/// Where a configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Defaults with environment overrides
    Environment,
}

/// A configuration plus how it was found
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
    /// Candidate files that exist but failed to load
    pub rejected: Vec<(PathBuf, String)>,
}

impl LoadedConfig {
    pub fn log_source(&self) {
        for (path, error) in &self.rejected {
            tracing::warn!("Failed to load config from {:?}: {}", path, error);
        }
        match &self.source {
            ConfigSource::File(path) => tracing::info!("Loaded config from {:?}", path),
            ConfigSource::Environment => {
                tracing::info!("Using default config with environment overrides")
            }
        }
    }
}
