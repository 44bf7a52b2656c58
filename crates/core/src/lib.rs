//! Core functionality shared by the platform component crates.
//!
//! This crate provides process-level plumbing: structured logging
//! initialization, component configuration loading, and the error type
//! for both.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ComponentConfig, LogFormat, DEFAULT_URL};
pub use error::{CoreError, Result};
