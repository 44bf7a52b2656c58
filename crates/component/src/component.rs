//! Connection and lifecycle controller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use platform_identity::{Identity, Role};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::bus::nats::{NatsConnection, NatsConnector};
use crate::bus::{BusConnection, BusConnector, BusCredentials};
use crate::error::{ComponentError, Result};
use crate::heartbeat::Heartbeat;
use crate::log_sink::BusLogSink;
use crate::payload::OpaqueData;
use crate::registration::{self, HeartbeatFn, RegisterOptions, RegistrationResponse};

/// Upper bound on a graceful stop.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of a [`Component`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No successful registration yet
    Unregistered,
    /// Credentials held, not connected
    Registered,
    /// Connected with the heartbeat running
    Connected,
    /// Stop in progress
    Draining,
    /// Drained and closed cleanly
    Closed,
    /// Stop timed out; the connection may still close on its own
    Closing,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unregistered => "unregistered",
            LifecycleState::Registered => "registered",
            LifecycleState::Connected => "connected",
            LifecycleState::Draining => "draining",
            LifecycleState::Closed => "closed",
            LifecycleState::Closing => "closing",
        };
        f.write_str(name)
    }
}

struct HeartbeatHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// A platform component: one identity, one registration, one bus connection.
///
/// `register` and `start` take `&mut self`, so a component is driven by a
/// single owner. The bus connection it opens can be shared freely through
/// [`Component::connection`] and [`Component::log_sink`].
pub struct Component {
    component_type: String,
    span: Span,
    http: reqwest::Client,
    connector: Arc<dyn BusConnector>,
    identity: Option<Arc<Identity>>,
    registration: Option<RegistrationResponse>,
    heartbeat_fn: Option<HeartbeatFn>,
    connection: Option<Arc<dyn BusConnection>>,
    heartbeat: Option<HeartbeatHandle>,
    state: LifecycleState,
}

impl Component {
    /// Component of `component_type` that connects over NATS.
    pub fn new(component_type: impl Into<String>) -> Self {
        Self::with_connector(component_type, Arc::new(NatsConnector::new()))
    }

    /// Component using a custom bus connector.
    pub fn with_connector(
        component_type: impl Into<String>,
        connector: Arc<dyn BusConnector>,
    ) -> Self {
        let component_type = component_type.into();
        let span = info_span!("component", component_type = %component_type);
        Self {
            component_type,
            span,
            http: reqwest::Client::new(),
            connector,
            identity: None,
            registration: None,
            heartbeat_fn: None,
            connection: None,
            heartbeat: None,
            state: LifecycleState::Unregistered,
        }
    }

    /// Replace the span this component's diagnostics are recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Identity from the last successful registration.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    /// Control plane response from the last successful registration.
    pub fn registration(&self) -> Option<&RegistrationResponse> {
        self.registration.as_ref()
    }

    /// Raw component config returned by the control plane.
    pub fn config(&self) -> Option<&OpaqueData> {
        self.registration.as_ref().and_then(|r| r.config.as_ref())
    }

    /// Shared publish capability, while connected.
    pub fn connection(&self) -> Option<Arc<dyn BusConnection>> {
        self.connection.clone()
    }

    /// Underlying NATS client when connected over NATS.
    pub fn nats_client(&self) -> Option<async_nats::Client> {
        let connection = self.connection.as_ref()?;
        connection
            .as_any()
            .downcast_ref::<NatsConnection>()
            .map(|nats| nats.client().clone())
    }

    /// Log sink writing to this component's log subject.
    pub fn log_sink(&self) -> Result<BusLogSink> {
        match &self.connection {
            Some(connection) if self.state == LifecycleState::Connected => {
                Ok(BusLogSink::new(connection.clone(), &self.component_type))
            }
            _ => Err(ComponentError::InvalidState(format!(
                "log sink requires a connected component ({})",
                self.state
            ))),
        }
    }

    /// Publish on the component's bus connection.
    pub async fn publish(&self, subject: impl Into<String>, payload: impl Into<Bytes>) -> Result<()> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| ComponentError::InvalidState(format!("not connected ({})", self.state)))?;
        connection.publish(subject.into(), payload.into()).await
    }

    /// Register with the control plane under a freshly generated identity.
    ///
    /// Every call rotates the identity. The identity and response are only
    /// stored once the handshake fully succeeds; a failed call leaves any
    /// earlier registration in place.
    pub async fn register(&mut self, options: RegisterOptions<'_>) -> Result<()> {
        let span = self.span.clone();
        self.register_inner(options).instrument(span).await
    }

    async fn register_inner(&mut self, mut options: RegisterOptions<'_>) -> Result<()> {
        if matches!(
            self.state,
            LifecycleState::Connected | LifecycleState::Draining
        ) {
            return Err(ComponentError::InvalidState(format!(
                "cannot register while {}",
                self.state
            )));
        }

        let identity = Arc::new(Identity::generate(Role::User)?);
        let response = registration::register(&self.http, &identity, &mut options).await?;

        self.identity = Some(identity);
        self.registration = Some(response);
        self.heartbeat_fn = options.heartbeat.take();
        self.connection = None;
        self.state = LifecycleState::Registered;
        Ok(())
    }

    /// Connect to the bus and start the heartbeat.
    ///
    /// The heartbeat runs under a child of `parent`, so cancelling `parent`
    /// stops it as well.
    pub async fn start(&mut self, parent: &CancellationToken) -> Result<()> {
        let span = self.span.clone();
        self.start_inner(parent).instrument(span).await
    }

    async fn start_inner(&mut self, parent: &CancellationToken) -> Result<()> {
        match self.state {
            LifecycleState::Registered => {}
            LifecycleState::Connected => {
                warn!("start called on a connected component");
                return Ok(());
            }
            LifecycleState::Unregistered => return Err(ComponentError::NotRegistered),
            other => {
                return Err(ComponentError::InvalidState(format!(
                    "cannot start while {}",
                    other
                )))
            }
        }

        let (identity, registration) = match (&self.identity, &self.registration) {
            (Some(identity), Some(registration)) => (identity.clone(), registration),
            _ => return Err(ComponentError::NotRegistered),
        };

        let credentials = BusCredentials {
            jwt: registration.jwt.clone(),
            identity: identity.clone(),
        };
        let name = format!("platform component {}", self.component_type);
        let connection = self
            .connector
            .connect(&registration.server, &credentials, &name)
            .await?;

        info!(server = %registration.server, "connected to bus");

        let token = parent.child_token();
        let heartbeat = Heartbeat::new(
            connection.clone(),
            &self.component_type,
            identity.public_key(),
            self.heartbeat_fn.clone(),
        );
        let task = heartbeat.spawn(token.clone());

        self.heartbeat = Some(HeartbeatHandle { token, task });
        self.connection = Some(connection);
        self.state = LifecycleState::Connected;
        Ok(())
    }

    /// Stop the heartbeat, drain the connection, and wait for it to close.
    ///
    /// Drain is requested as soon as the heartbeat is cancelled, without
    /// waiting for an in-flight beat to finish.
    ///
    /// Bounded by [`DRAIN_TIMEOUT`]. On timeout the component is left in
    /// [`LifecycleState::Closing`] and [`ComponentError::DrainTimeout`] is
    /// returned. Stop may only succeed once.
    pub async fn stop(&mut self) -> Result<()> {
        let span = self.span.clone();
        self.stop_inner().instrument(span).await
    }

    async fn stop_inner(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Connected => {}
            LifecycleState::Unregistered | LifecycleState::Registered => {
                return Err(ComponentError::InvalidState(format!(
                    "cannot stop a component that was never started ({})",
                    self.state
                )))
            }
            other => {
                return Err(ComponentError::InvalidState(format!(
                    "stop already called ({})",
                    other
                )))
            }
        }

        let connection = self
            .connection
            .clone()
            .ok_or_else(|| ComponentError::InvalidState("no bus connection".to_string()))?;
        let heartbeat = self.heartbeat.take();
        if let Some(heartbeat) = &heartbeat {
            heartbeat.token.cancel();
        }

        // Subscribe before draining so a fast close is not missed
        let closed = connection.closed();
        self.state = LifecycleState::Draining;
        info!("draining bus connection");

        let shutdown = drain_and_wait(connection.as_ref(), closed, heartbeat);
        match tokio::time::timeout(DRAIN_TIMEOUT, shutdown).await {
            Ok(Ok(())) => {
                self.state = LifecycleState::Closed;
                self.connection = None;
                info!("bus connection closed");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = LifecycleState::Closing;
                warn!(error = %e, "bus drain failed");
                Err(e)
            }
            Err(_) => {
                self.state = LifecycleState::Closing;
                warn!(timeout_ms = DRAIN_TIMEOUT.as_millis() as u64, "bus drain timed out");
                Err(ComponentError::DrainTimeout)
            }
        }
    }
}

/// Drain first; the heartbeat is only joined once the connection is closed,
/// so a beat stuck on a full bus cannot hold up the drain request.
async fn drain_and_wait(
    connection: &dyn BusConnection,
    mut closed: watch::Receiver<bool>,
    heartbeat: Option<HeartbeatHandle>,
) -> Result<()> {
    connection.drain().await?;

    if closed.wait_for(|closed| *closed).await.is_err() {
        return Err(ComponentError::Drain("close notification dropped".to_string()));
    }

    if let Some(heartbeat) = heartbeat {
        if let Err(e) = heartbeat.task.await {
            debug!(error = %e, "heartbeat task ended abnormally");
        }
    }
    Ok(())
}

impl Drop for Component {
    fn drop(&mut self) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.token.cancel();
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("component_type", &self.component_type)
            .field("state", &self.state)
            .field("identity", &self.identity.as_ref().map(|i| i.public_key()))
            .field("server", &self.registration.as_ref().map(|r| r.server.as_str()))
            .finish()
    }
}
