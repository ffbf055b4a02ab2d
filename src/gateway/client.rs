//! Internal API Client
//!
//! HTTP client for the platform's internal endpoints: controller/device
//! registration and device action lookup. Every request carries the shared
//! secret in the `x-internal-token` header. Nothing is retried.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::RegistrationConfig;
use crate::topic::RegistrationKind;

/// Header carrying the shared secret
pub const TOKEN_HEADER: &str = "x-internal-token";

/// Forwards registration announcements to the platform
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, kind: RegistrationKind, body: &Value) -> Result<(), RegistrationError>;
}

/// Supplies the configured actions of a device
#[async_trait]
pub trait ActionSource: Send + Sync {
    async fn device_actions(&self, device_id: &str) -> Result<Vec<DeviceAction>, RegistrationError>;
}

/// One action a device supports, as configured in the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAction {
    pub action_id: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionsResponse {
    #[serde(default)]
    actions: Vec<DeviceAction>,
}

/// Client for the internal platform API
pub struct InternalApiClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl InternalApiClient {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self, RegistrationError> {
        let base_url =
            Url::parse(base_url).map_err(|e| RegistrationError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(RegistrationError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    pub fn from_config(config: &RegistrationConfig) -> Result<Self, RegistrationError> {
        let token = config
            .internal_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(RegistrationError::MissingToken)?;
        Self::new(&config.api_url, token, config.timeout())
    }

    /// Build `<base>/<segments...>`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistrationError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistrationError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn registration_url(&self, kind: RegistrationKind) -> Result<Url, RegistrationError> {
        let collection = match kind {
            RegistrationKind::Controller => "controllers",
            RegistrationKind::Device => "devices",
        };
        self.endpoint(&["internal", collection, "register"])
    }
}

fn map_send_error(e: reqwest::Error) -> RegistrationError {
    if e.is_timeout() {
        RegistrationError::Timeout
    } else if e.is_connect() {
        RegistrationError::Unavailable
    } else {
        RegistrationError::Request(e)
    }
}

async fn api_error(response: reqwest::Response) -> RegistrationError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    RegistrationError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl Registrar for InternalApiClient {
    async fn register(&self, kind: RegistrationKind, body: &Value) -> Result<(), RegistrationError> {
        let url = self.registration_url(kind)?;

        let response = self
            .client
            .post(url)
            .header(TOKEN_HEADER, &self.token)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        if response.status().is_success() {
            debug!(kind = %kind, status = %response.status(), "Registration accepted");
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }
}

#[async_trait]
impl ActionSource for InternalApiClient {
    async fn device_actions(&self, device_id: &str) -> Result<Vec<DeviceAction>, RegistrationError> {
        let url = self.endpoint(&["internal", "devices", device_id, "actions"])?;

        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(map_send_error)?;

        if response.status().is_success() {
            let body: ActionsResponse = response.json().await?;
            Ok(body.actions)
        } else {
            Err(api_error(response).await)
        }
    }
}

/// Errors talking to the internal API
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Internal API unavailable")]
    Unavailable,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("Internal API token is not configured")]
    MissingToken,
}
