//! Configuration management for platform components.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Production control plane base URL.
pub const DEFAULT_URL: &str = "https://cloud.synadia.com";

/// Environment variable carrying the bearer token.
pub const ENV_TOKEN: &str = "SCP_PLATFORM_TOKEN";
/// Environment variable overriding the control plane URL.
pub const ENV_URL: &str = "SCP_URL";
/// Environment variable naming the component type.
pub const ENV_COMPONENT_TYPE: &str = "SCP_COMPONENT_TYPE";
/// Environment variable selecting the local log format.
pub const ENV_LOG_FORMAT: &str = "SCP_LOG_FORMAT";

/// Local log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(CoreError::InvalidValue {
                key: ENV_LOG_FORMAT,
                value: other.to_string(),
            }),
        }
    }
}

/// Settings a process needs to register a platform component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentConfig {
    /// Component type, used in bus subject names
    pub component_type: String,
    /// Control plane base URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Bearer token presented to the control plane
    #[serde(default)]
    pub token: String,
    /// Local log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

impl ComponentConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from `SCP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default_config();
        let log_format = match lookup(ENV_LOG_FORMAT) {
            Some(raw) => raw.parse()?,
            None => defaults.log_format,
        };

        let config = Self {
            component_type: lookup(ENV_COMPONENT_TYPE).unwrap_or(defaults.component_type),
            url: lookup(ENV_URL)
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.url),
            token: lookup(ENV_TOKEN).ok_or(CoreError::MissingValue(ENV_TOKEN))?,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            component_type: "workloads".to_string(),
            url: default_url(),
            token: String::new(),
            log_format: LogFormat::Text,
        }
    }

    /// Reject settings that can never produce a successful registration.
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(CoreError::MissingValue("token"));
        }
        if self.component_type.trim().is_empty() {
            return Err(CoreError::MissingValue("component_type"));
        }
        if self.component_type.contains(|c: char| c.is_whitespace() || c == '.') {
            return Err(CoreError::InvalidValue {
                key: "component_type",
                value: self.component_type.clone(),
            });
        }
        Ok(())
    }
}
