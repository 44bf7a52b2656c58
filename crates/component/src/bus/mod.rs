//! Message bus capability.
//!
//! The component never speaks the bus wire protocol itself. It connects
//! through a [`BusConnector`] and uses the resulting [`BusConnection`] as a
//! publish capability shared between the heartbeat task, log sinks, and
//! application code. Only the lifecycle controller drains it.

pub mod memory;
pub mod nats;
#[cfg(test)]
pub(crate) mod testing;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use platform_identity::Identity;
use tokio::sync::watch;

use crate::error::Result;

/// Credentials for authenticating to the bus.
///
/// The JWT issued by the control plane is paired with the identity's seed,
/// which signs the server's connect nonce.
#[derive(Clone)]
pub struct BusCredentials {
    /// Signed, time-bounded user JWT
    pub jwt: String,
    /// Identity whose public key the JWT was issued for
    pub identity: Arc<Identity>,
}

impl fmt::Debug for BusCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusCredentials")
            .field("jwt", &"<redacted>")
            .field("identity", &self.identity.public_key())
            .finish()
    }
}

/// Opens authenticated bus connections.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Connect to `server`, identifying the connection as `name`.
    async fn connect(
        &self,
        server: &str,
        credentials: &BusCredentials,
        name: &str,
    ) -> Result<Arc<dyn BusConnection>>;
}

/// A live bus session.
///
/// Implementations must tolerate concurrent publishes from several tasks.
#[async_trait]
pub trait BusConnection: Send + Sync {
    /// Publish one message, waiting for room in the transport's buffer.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;

    /// Queue one message without waiting.
    ///
    /// Fails with [`ComponentError::Publish`](crate::ComponentError::Publish)
    /// when the transport cannot accept it right now. Callable from
    /// synchronous code running on a runtime thread.
    fn try_publish(&self, subject: String, payload: Bytes) -> Result<()>;

    /// Request a graceful drain; the connection closes once in-flight work completes.
    async fn drain(&self) -> Result<()>;

    /// Close notification. The value flips to `true` once the connection has closed.
    fn closed(&self) -> watch::Receiver<bool>;

    /// Whether the session is currently connected.
    fn is_connected(&self) -> bool;

    /// Downcast support for reaching the concrete transport.
    fn as_any(&self) -> &dyn Any;
}
