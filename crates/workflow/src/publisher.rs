//! Downstream publisher adapter
//!
//! The `PublishProcessed` step hands a `ProcessedEvent` to a [`Publisher`].
//! [`BusPublisher`] wraps it in the outbound envelope and sends it over a
//! [`BusTransport`]:
//!
//! - [`ChannelTransport`]: in-process bus backed by a tokio channel
//! - [`LineTransport`]: one JSON line per event on any async writer
//!   ([`StdoutTransport`] for the CLI)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tally_protocol::{OutboundEvent, ProcessedEvent};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::PublishError;

/// Default bus name
pub const DEFAULT_BUS_NAME: &str = "tally";

/// Default `source` of outbound events
pub const DEFAULT_SOURCE: &str = "tally.workflow";

/// Emits processed events downstream
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    async fn publish(&self, event: &ProcessedEvent) -> Result<(), PublishError>;
}

/// Carries outbound envelopes to the bus
#[async_trait]
pub trait BusTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, envelope: &OutboundEvent) -> Result<(), PublishError>;
}

// =============================================================================
// Bus publisher
// =============================================================================

/// Publishes processed events as bus envelopes
#[derive(Clone)]
pub struct BusPublisher {
    transport: Arc<dyn BusTransport>,
    bus: String,
    source: String,
    detail_type: String,
}

impl BusPublisher {
    /// Publisher with default bus name, source and detail type
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self {
            transport,
            bus: DEFAULT_BUS_NAME.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            detail_type: ProcessedEvent::DETAIL_TYPE.to_string(),
        }
    }

    pub fn with_bus(mut self, bus: impl Into<String>) -> Self {
        self.bus = bus.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_detail_type(mut self, detail_type: impl Into<String>) -> Self {
        self.detail_type = detail_type.into();
        self
    }

    /// Build the envelope for `event`, stamped now
    pub fn envelope(&self, event: &ProcessedEvent) -> OutboundEvent {
        OutboundEvent::new(
            self.bus.clone(),
            self.source.clone(),
            self.detail_type.clone(),
            &Utc::now(),
            event.clone(),
        )
    }
}

impl std::fmt::Debug for BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPublisher")
            .field("transport", &self.transport.name())
            .field("bus", &self.bus)
            .field("source", &self.source)
            .field("detail_type", &self.detail_type)
            .finish()
    }
}

#[async_trait]
impl Publisher for BusPublisher {
    fn name(&self) -> &str {
        &self.bus
    }

    async fn publish(&self, event: &ProcessedEvent) -> Result<(), PublishError> {
        let envelope = self.envelope(event);
        self.transport.send(&envelope).await?;
        tracing::debug!(
            bus = %self.bus,
            transport = self.transport.name(),
            transaction_id = %event.transaction_id,
            "processed event published"
        );
        Ok(())
    }
}

// =============================================================================
// Transports
// =============================================================================

/// In-process bus: envelopes are delivered to a channel receiver
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<OutboundEvent>,
}

impl ChannelTransport {
    /// Transport plus the receiving end of the bus
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl BusTransport for ChannelTransport {
    fn name(&self) -> &str {
        "channel"
    }

    async fn send(&self, envelope: &OutboundEvent) -> Result<(), PublishError> {
        self.sender
            .send(envelope.clone())
            .await
            .map_err(|_| PublishError::Closed)
    }
}

/// Writes each envelope as one JSON line
#[derive(Debug)]
pub struct LineTransport<W> {
    writer: tokio::sync::Mutex<W>,
}

/// Line transport on standard output
pub type StdoutTransport = LineTransport<tokio::io::Stdout>;

impl<W> LineTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl LineTransport<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> BusTransport for LineTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        "lines"
    }

    async fn send(&self, envelope: &OutboundEvent) -> Result<(), PublishError> {
        let mut line = envelope.to_bytes()?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}
