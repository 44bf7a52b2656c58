//! Identity management for platform components.
//!
//! Every component instance is named by an Ed25519 keypair, encoded in the
//! NKey format used by the message bus. The public half is sent to the
//! control plane during registration; the private seed never leaves the
//! process and is only used to answer the bus's authentication nonce.
//!
//! # Security Model
//!
//! - Identities are generated from the OS entropy source
//! - Seeds are zeroized on drop and redacted from `Debug` output
//! - Identities are never persisted
//! - Imported key material must match the expected role prefix

pub mod error;
pub mod identity;

pub use error::{IdentityError, IdentityResult};
pub use identity::{Identity, Role};
