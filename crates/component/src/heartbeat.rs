//! Liveness heartbeat task.
//!
//! While a component is connected it publishes a small `ping` record every
//! [`HEARTBEAT_INTERVAL`]. Reporting is best-effort: publish failures are
//! logged and dropped, and late ticks are skipped rather than queued.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use crate::bus::BusConnection;
use crate::registration::HeartbeatFn;

/// Subject root for heartbeats.
pub const HEARTBEAT_SUBJECT: &str = "$PC.heartbeat";

/// Fixed heartbeat period.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);

/// Message kind carried by every heartbeat.
pub const PING: &str = "ping";

/// Heartbeat subject for a component type.
pub fn heartbeat_subject(component_type: &str) -> String {
    format!("{}.{}", HEARTBEAT_SUBJECT, component_type)
}

/// One heartbeat, serialized and forgotten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    /// Always [`PING`]
    pub msg: String,
    /// Public identifier of the component
    pub id: String,
    /// Caller-supplied status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl HeartbeatRecord {
    pub fn ping(id: impl Into<String>, data: Option<String>) -> Self {
        Self {
            msg: PING.to_string(),
            id: id.into(),
            data,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Heartbeat publisher bound to one connection.
pub struct Heartbeat {
    connection: Arc<dyn BusConnection>,
    subject: String,
    public_key: String,
    status: Option<HeartbeatFn>,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(
        connection: Arc<dyn BusConnection>,
        component_type: &str,
        public_key: impl Into<String>,
        status: Option<HeartbeatFn>,
    ) -> Self {
        Self {
            connection,
            subject: heartbeat_subject(component_type),
            public_key: public_key.into(),
            status,
            interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Build the record for the current tick.
    pub fn record(&self) -> HeartbeatRecord {
        let data = self.status.as_ref().map(|status| status());
        HeartbeatRecord::ping(self.public_key.clone(), data)
    }

    /// Spawn the loop; it runs until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token).instrument(Span::current()))
    }

    /// Publish every interval until cancelled. The first beat is one
    /// interval after start, and there is no final beat on cancellation.
    /// A beat still waiting on the bus when the token fires is abandoned.
    pub async fn run(self, token: CancellationToken) {
        info!(subject = %self.subject, "starting heartbeat");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.beat() => {}
            }
        }

        info!("heartbeat stopped");
    }

    async fn beat(&self) {
        let payload = match self.record().to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode heartbeat");
                return;
            }
        };

        if let Err(e) = self.connection.publish(self.subject.clone(), payload).await {
            debug!(error = %e, "heartbeat publish failed");
        }
    }
}
