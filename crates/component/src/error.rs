//! Error types for platform component operations.
//!
//! Handshake and connect errors are fatal to the attempt and are never
//! retried internally; callers re-run register and start from scratch.

use std::fmt;

use platform_identity::IdentityError;
use thiserror::Error;

/// Which JSON document failed to decode during registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The control plane's response envelope
    Envelope,
    /// The opaque config embedded in the envelope
    Config,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStage::Envelope => f.write_str("registration response"),
            DecodeStage::Config => f.write_str("component config"),
        }
    }
}

/// Errors that can occur while registering, connecting, or stopping a component.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Identity generation or key handling failed
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Caller-supplied registration data could not be serialized
    #[error("Failed to encode registration data: {0}")]
    Encode(#[source] serde_json::Error),

    /// HTTP transport failure, including the request timeout
    #[error("Register request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Control plane answered with a non-200 status
    #[error("Registration rejected ({status}): {body}")]
    RegistrationRejected { status: u16, body: String },

    /// Malformed JSON from the control plane
    #[error("Failed to decode {stage}: {source}")]
    Decode {
        stage: DecodeStage,
        #[source]
        source: serde_json::Error,
    },

    /// Start was called before a successful register
    #[error("Component is not registered")]
    NotRegistered,

    /// Bus connection or authentication failed
    #[error("Bus connect failed: {0}")]
    Connect(String),

    /// Transport refused the drain request
    #[error("Bus drain failed: {0}")]
    Drain(String),

    /// Graceful shutdown did not complete within its bound
    #[error("Timeout waiting for bus connection to drain and close")]
    DrainTimeout,

    /// Bus rejected a publish
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Operation is not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ComponentError {
    /// Whether the error came from the control plane handshake.
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            ComponentError::Encode(_)
                | ComponentError::Request(_)
                | ComponentError::RegistrationRejected { .. }
                | ComponentError::Decode { .. }
        )
    }
}

/// Result type for component operations.
pub type Result<T> = std::result::Result<T, ComponentError>;
