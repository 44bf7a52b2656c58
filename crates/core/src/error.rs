//! Core error types

use thiserror::Error;

/// Core error type for configuration and process setup.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required setting is missing or empty
    #[error("Missing configuration value: {0}")]
    MissingValue(&'static str),

    /// A setting could not be parsed
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    /// Config file is not valid TOML for the expected shape
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
