//! Ships diagnostic records onto the bus.
//!
//! [`BusLogSink`] is a plain byte sink: every write becomes one message on
//! `$PC.{type}.Logs`. Any logging facade that accepts an [`io::Write`] can
//! use it; [`bus_layer`] wires it into `tracing_subscriber` with JSON
//! formatting.

use std::cell::Cell;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tracing::Subscriber;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::bus::BusConnection;

/// Log subject for a component type.
pub fn log_subject(component_type: &str) -> String {
    format!("$PC.{}.Logs", component_type)
}

thread_local! {
    static IN_WRITE: Cell<bool> = const { Cell::new(false) };
}

/// Byte sink publishing each write to the component's log subject.
///
/// Writes never wait on the bus: a record the transport cannot take right
/// away fails the write with [`io::ErrorKind::Other`]. Records emitted while
/// a write is already in progress on the same thread (for example by the
/// bus client itself) are dropped.
#[derive(Clone)]
pub struct BusLogSink {
    connection: Arc<dyn BusConnection>,
    subject: String,
}

impl BusLogSink {
    pub fn new(connection: Arc<dyn BusConnection>, component_type: &str) -> Self {
        Self {
            connection,
            subject: log_subject(component_type),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    fn publish(&self, record: &[u8]) -> io::Result<()> {
        let payload = Bytes::copy_from_slice(record);
        self.connection
            .try_publish(self.subject.clone(), payload)
            .map_err(io::Error::other)
    }
}

impl io::Write for BusLogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let record = buf.trim_ascii();

        if IN_WRITE.with(|flag| flag.replace(true)) {
            return Ok(buf.len());
        }
        let result = self.publish(record);
        IN_WRITE.with(|flag| flag.set(false));

        result.map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BusLogSink {
    type Writer = BusLogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// JSON formatting layer writing to `sink`.
///
/// Bus client internals are filtered out so their own diagnostics never
/// loop back onto the bus.
pub fn bus_layer<S>(sink: BusLogSink) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let targets = Targets::new()
        .with_default(LevelFilter::INFO)
        .with_target("async_nats", LevelFilter::OFF);

    tracing_subscriber::fmt::layer()
        .json()
        .with_writer(sink)
        .with_filter(targets)
}

/// Standalone subscriber that only ships to the bus.
pub fn bus_subscriber(sink: BusLogSink) -> impl Subscriber + Send + Sync {
    tracing_subscriber::registry().with(bus_layer(sink))
}
