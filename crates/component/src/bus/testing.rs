//! Back-pressured bus double for unit tests.
//!
//! Publishes go into a bounded channel that only the test drains, the same
//! shape as a real client's command buffer feeding its connection task.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use super::memory::BusMessage;
use super::{BusConnection, BusConnector, BusCredentials};
use crate::error::{ComponentError, Result};

pub(crate) struct ChannelConnection {
    sender: mpsc::Sender<BusMessage>,
    closed_tx: watch::Sender<bool>,
    drains: AtomicU64,
}

impl ChannelConnection {
    /// Connection with room for `capacity` undelivered messages.
    pub(crate) fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<BusMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let (closed_tx, _) = watch::channel(false);
        let connection = Arc::new(Self {
            sender,
            closed_tx,
            drains: AtomicU64::new(0),
        });
        (connection, receiver)
    }

    pub(crate) fn drain_count(&self) -> u64 {
        self.drains.load(Ordering::SeqCst)
    }

    pub(crate) fn connector(self: &Arc<Self>) -> ChannelConnector {
        ChannelConnector(Arc::clone(self))
    }
}

#[async_trait]
impl BusConnection for ChannelConnection {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.sender
            .send(BusMessage { subject, payload })
            .await
            .map_err(|_| ComponentError::Publish("connection closed".to_string()))
    }

    fn try_publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.sender
            .try_send(BusMessage { subject, payload })
            .map_err(|e| match e {
                TrySendError::Full(_) => ComponentError::Publish("buffer full".to_string()),
                TrySendError::Closed(_) => ComponentError::Publish("connection closed".to_string()),
            })
    }

    async fn drain(&self) -> Result<()> {
        self.drains.fetch_add(1, Ordering::SeqCst);
        self.closed_tx.send_replace(true);
        Ok(())
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        !*self.closed_tx.borrow()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hands out the same [`ChannelConnection`] on every connect.
pub(crate) struct ChannelConnector(Arc<ChannelConnection>);

#[async_trait]
impl BusConnector for ChannelConnector {
    async fn connect(
        &self,
        _server: &str,
        _credentials: &BusCredentials,
        _name: &str,
    ) -> Result<Arc<dyn BusConnection>> {
        let connection: Arc<dyn BusConnection> = self.0.clone();
        Ok(connection)
    }
}
