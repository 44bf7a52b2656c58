//! Error types for identity operations.

use thiserror::Error;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The entropy source or key primitive could not produce a keypair
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key material is empty, malformed, or has the wrong role
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
