use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

use crate::error::TransportResult;

pub mod envelope;
pub mod loopback;

/// Frame-level transport abstraction (Layer 1).
///
/// The only capability the channel core consumes: best-effort, asynchronous
/// delivery of opaque frames. No delivery or ordering guarantee beyond what
/// the underlying mechanism happens to provide.
#[async_trait]
pub trait FrameTransport: Send + Sync + Debug {
    /// Send a frame through the transport
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()>;

    /// Receive the next delivered frame
    async fn recv_frame(&self) -> TransportResult<Bytes>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Check if the transport is healthy
    fn is_healthy(&self) -> bool {
        self.is_connected()
    }

    /// Close the transport
    async fn close(&self) -> TransportResult<()>;

    /// Get transport statistics
    fn stats(&self) -> Option<TransportStats> {
        None
    }

    /// Get transport name/identifier
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Statistics collected by transport implementations
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transport Statistics:")?;
        writeln!(f, "  Messages sent:     {}", self.messages_sent)?;
        writeln!(f, "  Messages received: {}", self.messages_received)?;
        writeln!(f, "  Bytes sent:        {}", self.bytes_sent)?;
        writeln!(f, "  Bytes received:    {}", self.bytes_received)?;
        Ok(())
    }
}

#[async_trait]
impl<T: FrameTransport + ?Sized> FrameTransport for std::sync::Arc<T> {
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()> {
        (**self).send_frame(data).await
    }

    async fn recv_frame(&self) -> TransportResult<Bytes> {
        (**self).recv_frame().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    async fn close(&self) -> TransportResult<()> {
        (**self).close().await
    }

    fn stats(&self) -> Option<TransportStats> {
        (**self).stats()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: FrameTransport + ?Sized> FrameTransport for Box<T> {
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()> {
        (**self).send_frame(data).await
    }

    async fn recv_frame(&self) -> TransportResult<Bytes> {
        (**self).recv_frame().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    async fn close(&self) -> TransportResult<()> {
        (**self).close().await
    }

    fn stats(&self) -> Option<TransportStats> {
        (**self).stats()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
