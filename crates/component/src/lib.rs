//! Client runtime that joins a platform component to the managed message bus.
//!
//! A component generates an identity, registers it with the control plane
//! over HTTP in exchange for bus credentials, connects to the bus, and keeps
//! publishing liveness heartbeats until it is stopped. Its diagnostic output
//! can optionally be shipped onto the bus through [`BusLogSink`].
//!
//! # Lifecycle
//!
//! ```text
//! Unregistered ──register──▶ Registered ──start──▶ Connected
//!                                                      │ stop
//!                                                      ▼
//!                                   Closing ◀─timeout─ Draining ──▶ Closed
//! ```
//!
//! # Example
//! ```no_run
//! use platform_component::{Component, RegisterOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), platform_component::ComponentError> {
//! let mut component = Component::new("workloads");
//! component
//!     .register(RegisterOptions::new("token").url("https://cloud.synadia.com"))
//!     .await?;
//! component.start(&CancellationToken::new()).await?;
//! // ... application work ...
//! component.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod component;
pub mod error;
pub mod heartbeat;
pub mod log_sink;
pub mod payload;
pub mod registration;

pub use bus::memory::{BusMessage, ConnectionRecord, InMemoryBus, InMemoryConnector};
pub use bus::nats::{NatsConnection, NatsConnector};
pub use bus::{BusConnection, BusConnector, BusCredentials};
pub use component::{Component, LifecycleState, DRAIN_TIMEOUT};
pub use error::{ComponentError, DecodeStage, Result};
pub use heartbeat::{heartbeat_subject, Heartbeat, HeartbeatRecord, HEARTBEAT_INTERVAL};
pub use log_sink::{bus_layer, bus_subscriber, log_subject, BusLogSink};
pub use payload::OpaqueData;
pub use registration::{
    ConfigDestination, HeartbeatFn, RegisterOptions, RegistrationRequest, RegistrationResponse,
    CONNECT_PATH, REGISTER_TIMEOUT,
};

pub use platform_core::DEFAULT_URL;
pub use platform_identity::{Identity, IdentityError, Role};
