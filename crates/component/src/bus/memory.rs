//! In-process bus for tests and broker-less runs.
//!
//! Uses `tokio::sync::broadcast` for live subscribers and keeps a log of
//! every accepted message so callers can assert on what was published.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::{BusConnection, BusConnector, BusCredentials};
use crate::error::{ComponentError, Result};

/// Nonce the in-memory server challenges connecting identities with.
const CONNECT_NONCE: &[u8] = b"in-memory-bus-nonce";

/// Default capacity of the live subscriber channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// A message accepted by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

impl BusMessage {
    /// Payload as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// What a connector observed at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub server: String,
    pub name: String,
    pub jwt: String,
    pub public_key: String,
}

/// In-memory implementation of the bus.
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,
    published: Mutex<Vec<BusMessage>>,
    connections: Mutex<Vec<ConnectionRecord>>,
    closed_tx: watch::Sender<bool>,
    connected: AtomicBool,
    fail_publish: AtomicBool,
    close_on_drain: AtomicBool,
    drains: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Arc<Self> {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            sender,
            published: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
            closed_tx,
            connected: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            close_on_drain: AtomicBool::new(true),
            drains: AtomicU64::new(0),
        })
    }

    /// Connector handing out connections to this bus.
    pub fn connector(self: &Arc<Self>) -> InMemoryConnector {
        InMemoryConnector {
            bus: Arc::clone(self),
        }
    }

    /// Live stream of messages published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Every message accepted so far.
    pub fn published(&self) -> Vec<BusMessage> {
        lock(&self.published).clone()
    }

    /// Messages accepted on one subject.
    pub fn published_on(&self, subject: &str) -> Vec<BusMessage> {
        lock(&self.published)
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Connections opened so far.
    pub fn connections(&self) -> Vec<ConnectionRecord> {
        lock(&self.connections).clone()
    }

    /// Make publishes fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Simulate a connection whose drain never completes.
    pub fn never_close(&self) {
        self.close_on_drain.store(false, Ordering::SeqCst);
    }

    /// Number of drain requests received.
    pub fn drain_count(&self) -> u64 {
        self.drains.load(Ordering::SeqCst)
    }

    /// Close the connection immediately, as if the server dropped it.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed_tx.send_replace(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BusConnection for InMemoryBus {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.try_publish(subject, payload)
    }

    fn try_publish(&self, subject: String, payload: Bytes) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ComponentError::Publish("connection closed".to_string()));
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(ComponentError::Publish("publish rejected".to_string()));
        }

        let message = BusMessage { subject, payload };
        lock(&self.published).push(message.clone());
        // No receivers is fine, the message is still recorded
        let _ = self.sender.send(message);
        Ok(())
    }

    async fn drain(&self) -> Result<()> {
        self.drains.fetch_add(1, Ordering::SeqCst);
        if self.close_on_drain.load(Ordering::SeqCst) {
            self.close();
        }
        Ok(())
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connector for an [`InMemoryBus`].
///
/// Performs the same checks a real server would: a non-empty address, a
/// credential token, and an identity able to sign the connect nonce.
#[derive(Clone)]
pub struct InMemoryConnector {
    bus: Arc<InMemoryBus>,
}

#[async_trait]
impl BusConnector for InMemoryConnector {
    async fn connect(
        &self,
        server: &str,
        credentials: &BusCredentials,
        name: &str,
    ) -> Result<Arc<dyn BusConnection>> {
        if server.trim().is_empty() {
            return Err(ComponentError::Connect("empty broker address".to_string()));
        }
        if credentials.jwt.is_empty() {
            return Err(ComponentError::Connect("authorization violation".to_string()));
        }

        let signature = credentials
            .identity
            .sign(CONNECT_NONCE)
            .map_err(|e| ComponentError::Connect(e.to_string()))?;
        if !credentials.identity.verify(CONNECT_NONCE, &signature) {
            return Err(ComponentError::Connect("nonce signature invalid".to_string()));
        }

        lock(&self.bus.connections).push(ConnectionRecord {
            server: server.to_string(),
            name: name.to_string(),
            jwt: credentials.jwt.clone(),
            public_key: credentials.identity.public_key().to_string(),
        });
        self.bus.connected.store(true, Ordering::SeqCst);
        self.bus.closed_tx.send_replace(false);

        debug!(server, name, "in-memory bus connection opened");

        let connection: Arc<dyn BusConnection> = self.bus.clone();
        Ok(connection)
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
    async fn test_publish_before_connect_fails() {
        let bus = InMemoryBus::new();
        let err = bus
            .publish("test".to_string(), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentError::Publish(_)));
    }

    #[tokio::test]
    async fn test_connect_and_publish() {
        let bus = InMemoryBus::new();
        let connection = bus
            .connector()
            .connect("memory://local", &credentials(), "platform component test")
            .await
            .unwrap();
        let mut rx = bus.subscribe();

        connection
            .publish("test".to_string(), Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.subject, "test");
        assert_eq!(received.text(), "hello");
        assert_eq!(bus.published_on("test").len(), 1);
        assert_eq!(bus.connections()[0].name, "platform component test");
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_server() {
        let bus = InMemoryBus::new();
        let result = bus.connector().connect("", &credentials(), "n").await;
        assert!(matches!(result, Err(ComponentError::Connect(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_public_only_identity() {
        let bus = InMemoryBus::new();
        let full = Identity::generate(Role::User).unwrap();
        let credentials = BusCredentials {
            jwt: "JWT123".to_string(),
            identity: Arc::new(Identity::from_public(full.public_key(), Role::User).unwrap()),
        };

        let result = bus.connector().connect("memory://local", &credentials, "n").await;
        assert!(matches!(result, Err(ComponentError::Connect(_))));
    }

    #[tokio::test]
    async fn test_drain_closes() {
        let bus = InMemoryBus::new();
        let connection = bus
            .connector()
            .connect("memory://local", &credentials(), "n")
            .await
            .unwrap();
        let closed = connection.closed();

        connection.drain().await.unwrap();

        assert!(*closed.borrow());
        assert!(!connection.is_connected());
        assert!(connection
            .publish("test".to_string(), Bytes::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_never_close() {
        let bus = InMemoryBus::new();
        bus.never_close();
        let connection = bus
            .connector()
            .connect("memory://local", &credentials(), "n")
            .await
            .unwrap();

        connection.drain().await.unwrap();

        assert!(!*connection.closed().borrow());
        assert_eq!(bus.drain_count(), 1);
    }
}
