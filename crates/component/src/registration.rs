//! Control plane registration handshake.
//!
//! # Protocol Flow
//!
//! 1. Component generates a fresh user identity
//! 2. Component POSTs its public key (plus optional component data) with a bearer token
//! 3. Control plane answers with a user JWT, account, bus address, and optional config
//! 4. The JWT and the identity seed are later used together to authenticate to the bus
//!
//! The handshake is attempted exactly once per call. Callers that need
//! retries wrap [`crate::Component::register`] themselves.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use platform_core::{ComponentConfig, DEFAULT_URL};
use platform_identity::Identity;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ComponentError, DecodeStage, Result};
use crate::payload::OpaqueData;

/// Registration endpoint, relative to the control plane base URL.
pub const CONNECT_PATH: &str = "api/core/beta/platform-components/connect";

/// Client timeout for the registration request.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback producing the status string embedded in each heartbeat.
pub type HeartbeatFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Registration request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Public identifier of the freshly generated identity
    pub nkey_public: String,
    /// Component-specific payload, omitted when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OpaqueData>,
}

/// Decoded control plane response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// User JWT for bus authentication
    pub jwt: String,
    /// Account the user belongs to
    pub account: String,
    /// Bus address. May be empty; checked at connect time.
    pub server: String,
    /// Component config, schema owned by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<OpaqueData>,
}

/// Destination for the control plane's opaque config.
///
/// Implemented for every deserializable type, so any
/// `&mut T where T: DeserializeOwned` can be passed to
/// [`RegisterOptions::config`].
pub trait ConfigDestination: Send {
    fn decode_from(&mut self, data: &OpaqueData) -> serde_json::Result<()>;
}

impl<T: DeserializeOwned + Send> ConfigDestination for T {
    fn decode_from(&mut self, data: &OpaqueData) -> serde_json::Result<()> {
        *self = data.decode()?;
        Ok(())
    }
}

/// Settings for one registration attempt.
pub struct RegisterOptions<'a> {
    pub(crate) token: String,
    pub(crate) url: Option<String>,
    pub(crate) data: Option<OpaqueData>,
    pub(crate) config: Option<&'a mut dyn ConfigDestination>,
    pub(crate) heartbeat: Option<HeartbeatFn>,
}

impl<'a> RegisterOptions<'a> {
    /// Options authenticating with `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: None,
            data: None,
            config: None,
            heartbeat: None,
        }
    }

    /// Options from loaded component settings.
    pub fn from_config(config: &ComponentConfig) -> Self {
        Self::new(config.token.clone()).url(config.url.clone())
    }

    /// Target control plane base URL. Defaults to [`DEFAULT_URL`].
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Component-specific data sent with the request.
    pub fn data<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self> {
        self.data = Some(OpaqueData::encode(data).map_err(ComponentError::Encode)?);
        Ok(self)
    }

    /// Pre-encoded component data.
    pub fn raw_data(mut self, data: OpaqueData) -> Self {
        self.data = Some(data);
        self
    }

    /// Where to decode the config returned by the control plane.
    pub fn config(mut self, destination: &'a mut dyn ConfigDestination) -> Self {
        self.config = Some(destination);
        self
    }

    /// Status callback invoked on every heartbeat.
    pub fn heartbeat<F>(mut self, status: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.heartbeat = Some(Arc::new(status));
        self
    }

    /// Resolved base URL.
    pub fn target_url(&self) -> &str {
        match self.url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => DEFAULT_URL,
        }
    }

    /// Full registration endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.target_url().trim_end_matches('/'), CONNECT_PATH)
    }
}

impl fmt::Debug for RegisterOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterOptions")
            .field("url", &self.target_url())
            .field("token", &"<redacted>")
            .field("data", &self.data)
            .field("config", &self.config.is_some())
            .field("heartbeat", &self.heartbeat.is_some())
            .finish()
    }
}

/// Run the handshake for `identity` and decode the response.
///
/// Nothing is retained on failure; the caller commits the outcome.
pub(crate) async fn register(
    http: &reqwest::Client,
    identity: &Identity,
    options: &mut RegisterOptions<'_>,
) -> Result<RegistrationResponse> {
    let request = RegistrationRequest {
        nkey_public: identity.public_key().to_string(),
        data: options.data.clone(),
    };
    let body = serde_json::to_vec(&request).map_err(ComponentError::Encode)?;
    let endpoint = options.endpoint();

    info!(server = options.target_url(), user = identity.public_key(), "connecting to platform");

    let response = http
        .post(&endpoint)
        .header(AUTHORIZATION, format!("bearer {}", options.token))
        .header(CONTENT_TYPE, "application/json")
        .timeout(REGISTER_TIMEOUT)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;

    if status != StatusCode::OK {
        warn!(status = status.as_u16(), "registration rejected by control plane");
        return Err(ComponentError::RegistrationRejected {
            status: status.as_u16(),
            body: text,
        });
    }

    let decoded: RegistrationResponse =
        serde_json::from_str(&text).map_err(|source| ComponentError::Decode {
            stage: DecodeStage::Envelope,
            source,
        })?;

    info!(account = %decoded.account, "register request success");

    match (&decoded.config, options.config.as_deref_mut()) {
        (Some(data), Some(destination)) => {
            destination
                .decode_from(data)
                .map_err(|source| ComponentError::Decode {
                    stage: DecodeStage::Config,
                    source,
                })?;
        }
        (Some(_), None) => {
            warn!("control plane returned config data but no destination supplied");
        }
        (None, _) => {}
    }

    Ok(decoded)
}
