//! NATS transport for the bus capability.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_nats::connection::State;
use async_nats::{AuthError, Client, ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BusConnection, BusConnector, BusCredentials};
use crate::error::{ComponentError, Result};

/// Messages accepted by `try_publish` that have not reached the client yet.
pub const QUEUE_CAPACITY: usize = 1024;

/// How long a drain waits for queued messages to reach the client.
const QUEUE_FLUSH_TIMEOUT: Duration = Duration::from_millis(250);

type Queued = (String, Bytes);

/// Connects to NATS using user JWT + nonce signing.
#[derive(Debug, Clone, Default)]
pub struct NatsConnector;

impl NatsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    async fn connect(
        &self,
        server: &str,
        credentials: &BusCredentials,
        name: &str,
    ) -> Result<Arc<dyn BusConnection>> {
        if server.trim().is_empty() {
            return Err(ComponentError::Connect("empty broker address".to_string()));
        }

        let identity = credentials.identity.clone();
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);

        let options = ConnectOptions::with_jwt(credentials.jwt.clone(), move |nonce| {
            let identity = identity.clone();
            async move { identity.sign(&nonce).map_err(AuthError::new) }
        })
        .name(name)
        .event_callback(move |event| {
            let closed_tx = closed_tx.clone();
            async move {
                match event {
                    Event::Closed => {
                        closed_tx.send_replace(true);
                    }
                    Event::Disconnected | Event::LameDuckMode => {
                        warn!(%event, "bus connection event");
                    }
                    other => debug!(event = %other, "bus connection event"),
                }
            }
        });

        let client = options
            .connect(server)
            .await
            .map_err(|e| ComponentError::Connect(e.to_string()))?;

        Ok(Arc::new(NatsConnection::new(client, closed_rx)))
    }
}

/// A connected NATS client.
///
/// Non-blocking publishes go through a bounded queue that a forwarding task
/// feeds into the client, so synchronous callers never wait on the client's
/// own command buffer.
#[derive(Debug)]
pub struct NatsConnection {
    client: Client,
    closed: watch::Receiver<bool>,
    queue: Mutex<Option<mpsc::Sender<Queued>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl NatsConnection {
    fn new(client: Client, closed: watch::Receiver<bool>) -> Self {
        let (queue, pending) = mpsc::channel(QUEUE_CAPACITY);
        let forwarder = tokio::spawn(forward(client.clone(), pending));
        Self {
            client,
            closed,
            queue: Mutex::new(Some(queue)),
            forwarder: Mutex::new(Some(forwarder)),
        }
    }

    /// The underlying client, for subscriptions and request/reply.
    ///
    /// The client is closed when the owning component stops.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

async fn forward(client: Client, mut pending: mpsc::Receiver<Queued>) {
    while let Some((subject, payload)) = pending.recv().await {
        if let Err(e) = client.publish(subject, payload).await {
            debug!(error = %e, "queued publish failed");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BusConnection for NatsConnection {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| ComponentError::Publish(e.to_string()))
    }

    fn try_publish(&self, subject: String, payload: Bytes) -> Result<()> {
        let max_payload = self.client.server_info().max_payload;
        if max_payload > 0 && payload.len() > max_payload {
            return Err(ComponentError::Publish(format!(
                "payload of {} bytes exceeds server limit of {}",
                payload.len(),
                max_payload
            )));
        }

        let queue = lock(&self.queue);
        let sender = queue
            .as_ref()
            .ok_or_else(|| ComponentError::Publish("connection draining".to_string()))?;
        sender.try_send((subject, payload)).map_err(|e| match e {
            TrySendError::Full(_) => ComponentError::Publish("publish queue full".to_string()),
            TrySendError::Closed(_) => ComponentError::Publish("connection closed".to_string()),
        })
    }

    async fn drain(&self) -> Result<()> {
        // Stop accepting queued publishes and give the backlog a moment to flush
        let queue = lock(&self.queue).take();
        drop(queue);
        let forwarder = lock(&self.forwarder).take();
        if let Some(forwarder) = forwarder {
            if tokio::time::timeout(QUEUE_FLUSH_TIMEOUT, forwarder).await.is_err() {
                debug!("publish queue not flushed before drain");
            }
        }

        self.client
            .drain()
            .await
            .map_err(|e| ComponentError::Drain(e.to_string()))
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_identity::{Identity, Role};

    fn credentials() -> BusCredentials {
        BusCredentials {
            jwt: "JWT123".to_string(),
            identity: Arc::new(Identity::generate(Role::User).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_empty_server_rejected_before_dialing() {
        let err = NatsConnector::new()
            .connect("", &credentials(), "platform component test")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ComponentError::Connect(_)));
    }

    /// Needs a local `nats-server` without auth, e.g. `nats-server -p 4222`.
    /// Set `NATS_URL` to point elsewhere.
    #[tokio::test]
    #[ignore = "requires a running nats-server"]
    async fn test_drain_signals_close_against_live_server() {
        let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string());
        let connection = NatsConnector::new()
            .connect(&url, &credentials(), "platform component test")
            .await
            .unwrap();
        let mut closed = connection.closed();
        assert!(!*closed.borrow());
        assert!(connection.is_connected());

        connection
            .publish("test".to_string(), Bytes::from_static(b"test"))
            .await
            .unwrap();
        connection
            .try_publish("test".to_string(), Bytes::from_static(b"queued"))
            .unwrap();

        connection.drain().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), closed.wait_for(|closed| *closed))
            .await
            .expect("close event within a second")
            .unwrap();

        assert!(connection
            .try_publish("test".to_string(), Bytes::from_static(b"late"))
            .is_err());
    }
}
