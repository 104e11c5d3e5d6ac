//! Envelope-level transport (Layer 2).

use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{BincodeCodec, Codec};
use crate::envelope::Envelope;
use crate::error::TransportResult;
use crate::transport::{FrameTransport, TransportStats};

/// Transport adapter contract consumed by a [`Channel`](crate::Channel):
/// send one envelope, receive the next delivered envelope.
#[async_trait]
pub trait EnvelopeTransport<C: Codec = BincodeCodec>: Send + Sync + Debug {
    /// Send an envelope.
    async fn send(&self, envelope: &Envelope<C>) -> TransportResult<()>;

    /// Receive the next delivered envelope.
    async fn recv(&self) -> TransportResult<Envelope<C>>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Check if the transport is healthy.
    fn is_healthy(&self) -> bool {
        self.is_connected()
    }

    /// Close the transport.
    async fn close(&self) -> TransportResult<()>;

    /// Get transport statistics.
    fn stats(&self) -> Option<TransportStats> {
        None
    }
}

/// Adapter that lifts any [`FrameTransport`] into an [`EnvelopeTransport`]
/// using the envelope wire encoding.
#[derive(Debug)]
pub struct EnvelopeTransportAdapter<F: FrameTransport, C: Codec = BincodeCodec> {
    inner: F,
    _codec: PhantomData<C>,
}

impl<F: FrameTransport> EnvelopeTransportAdapter<F, BincodeCodec> {
    /// Create a new adapter with the default Bincode codec.
    pub fn new(transport: F) -> Self {
        Self {
            inner: transport,
            _codec: PhantomData,
        }
    }
}

impl<F: FrameTransport, C: Codec> EnvelopeTransportAdapter<F, C> {
    /// Create a new adapter with a specific codec.
    pub fn with_codec(transport: F) -> Self {
        Self {
            inner: transport,
            _codec: PhantomData,
        }
    }

    /// Get a reference to the inner transport.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Consume the adapter and return the inner transport.
    pub fn into_inner(self) -> F {
        self.inner
    }
}

#[async_trait]
impl<F: FrameTransport, C: Codec + Default> EnvelopeTransport<C> for EnvelopeTransportAdapter<F, C> {
    async fn send(&self, envelope: &Envelope<C>) -> TransportResult<()> {
        let bytes = envelope.encode()?;
        self.inner.send_frame(&bytes).await
    }

    async fn recv(&self) -> TransportResult<Envelope<C>> {
        let bytes = self.inner.recv_frame().await?;
        Envelope::decode(bytes)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.close().await
    }

    fn stats(&self) -> Option<TransportStats> {
        self.inner.stats()
    }
}

#[async_trait]
impl<T: EnvelopeTransport<C> + ?Sized, C: Codec + Default> EnvelopeTransport<C> for Arc<T> {
    async fn send(&self, envelope: &Envelope<C>) -> TransportResult<()> {
        (**self).send(envelope).await
    }

    async fn recv(&self) -> TransportResult<Envelope<C>> {
        (**self).recv().await
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
}

#[async_trait]
impl<T: EnvelopeTransport<C> + ?Sized, C: Codec + Default> EnvelopeTransport<C> for Box<T> {
    async fn send(&self, envelope: &Envelope<C>) -> TransportResult<()> {
        (**self).send(envelope).await
    }

    async fn recv(&self) -> TransportResult<Envelope<C>> {
        (**self).recv().await
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
}
