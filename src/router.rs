//! Message router: classifies inbound envelopes and dispatches them.
//!
//! Requests go to the answer registry, settlements go to the call
//! dispatcher. Envelopes are picked up one at a time in arrival order;
//! handler execution happens on spawned tasks so a slow handler never blocks
//! routing of subsequent envelopes.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::codec::Codec;
use crate::dispatch::CallDispatcher;
use crate::envelope::{Envelope, EnvelopeKind, Fault};
use crate::error::TransportError;
use crate::registry::{AnswerHandler, AnswerRegistry};
use crate::transport::envelope::EnvelopeTransport;

pub(crate) struct MessageRouter<T, C>
where
    T: EnvelopeTransport<C>,
    C: Codec,
{
    transport: Arc<T>,
    dispatcher: Arc<CallDispatcher<C>>,
    registry: Arc<AnswerRegistry>,
    closed: Arc<AtomicBool>,
}

impl<T, C> MessageRouter<T, C>
where
    T: EnvelopeTransport<C> + 'static,
    C: Codec + Default + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        transport: Arc<T>,
        dispatcher: Arc<CallDispatcher<C>>,
        registry: Arc<AnswerRegistry>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            registry,
            closed,
        }
    }

    /// Inbound loop: runs until the channel closes or the transport dies.
    pub(crate) async fn run(self) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            match self.transport.recv().await {
                Ok(envelope) => self.handle_inbound(envelope),
                // An idle tick from a transport with a read timeout; keep
                // listening.
                Err(TransportError::Timeout { .. }) => continue,
                // One malformed frame does not take the channel down.
                Err(TransportError::Protocol(reason)) => {
                    tracing::warn!(%reason, "discarding malformed inbound frame");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "inbound loop stopped");
                    break;
                }
            }
        }
    }

    fn handle_inbound(&self, envelope: Envelope<C>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match envelope.kind {
            EnvelopeKind::Request => self.serve_request(envelope),
            EnvelopeKind::Notify => self.serve_notify(envelope),
            EnvelopeKind::Response | EnvelopeKind::Error => {
                let id = envelope.id;
                if !self.dispatcher.settle(id, Ok(envelope)) {
                    // Already settled, timed out, or channel closed.
                    tracing::trace!(id = %id, "discarding orphaned settlement");
                }
            }
        }
    }

    fn serve_request(&self, envelope: Envelope<C>) {
        let transport = self.transport.clone();
        let id = envelope.id;

        let Some(handler) = self.registry.lookup(&envelope.event) else {
            tracing::debug!(id = %id, event = %envelope.event, "no handler for request");
            let reply = Envelope::fault(id, &Fault::no_handler(&envelope.event));
            tokio::spawn(async move {
                if let Err(e) = transport.send(&reply).await {
                    tracing::debug!(id = %id, error = %e, "failed to send fault reply");
                }
            });
            return;
        };

        tokio::spawn(async move {
            let reply = match invoke(handler, envelope).await {
                Ok(payload) => Envelope::response_raw(id, payload),
                Err(fault) => {
                    tracing::debug!(id = %id, fault = %fault.message, "handler faulted");
                    Envelope::fault(id, &fault)
                }
            };
            if let Err(e) = transport.send(&reply).await {
                tracing::debug!(id = %id, error = %e, "failed to send reply");
            }
        });
    }

    fn serve_notify(&self, envelope: Envelope<C>) {
        let Some(handler) = self.registry.lookup(&envelope.event) else {
            tracing::debug!(event = %envelope.event, "dropping cast with no handler");
            return;
        };

        tokio::spawn(async move {
            if let Err(fault) = invoke(handler, envelope).await {
                tracing::debug!(fault = %fault.message, "cast handler faulted");
            }
        });
    }
}

/// Run a handler, converting both returned errors and panics into faults so
/// a misbehaving handler never disrupts routing.
async fn invoke<C: Codec>(
    handler: Arc<dyn AnswerHandler>,
    envelope: Envelope<C>,
) -> std::result::Result<bytes::Bytes, Fault> {
    let outcome = AssertUnwindSafe(handler.handle(envelope.payload)).catch_unwind().await;
    match outcome {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(e)) => Err(Fault::handler(e.to_string())),
        Err(panic) => Err(Fault::handler(panic_description(panic))),
    }
}

fn panic_description(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
