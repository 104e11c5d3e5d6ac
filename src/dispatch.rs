//! Call dispatcher: correlation id allocation and pending-call bookkeeping.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;

use crate::codec::Codec;
use crate::envelope::{CallId, Envelope};
use crate::error::{CallError, Result};

/// Bookkeeping for one outstanding call.
///
/// Owned exclusively by the dispatcher and removed exactly once, on
/// settlement.
pub(crate) struct PendingCall<C: Codec> {
    pub(crate) event: String,
    pub(crate) issued_at: Instant,
    tx: oneshot::Sender<Result<Envelope<C>>>,
}

/// Tracks outstanding calls and enforces at-most-one settlement per call.
pub(crate) struct CallDispatcher<C: Codec> {
    next_id: AtomicU64,
    pending: Mutex<HashMap<CallId, PendingCall<C>>>,
}

impl<C: Codec> CallDispatcher<C> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh correlation id. Ids are monotonically increasing and
    /// never reused while a call with that id is pending.
    pub(crate) fn next_id(&self) -> CallId {
        CallId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Record a new pending call and hand back its settlement receiver.
    pub(crate) fn issue(&self, event: &str) -> (CallId, oneshot::Receiver<Result<Envelope<C>>>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        let entry = PendingCall {
            event: event.to_string(),
            issued_at: Instant::now(),
            tx,
        };

        // Monotonic allocation makes a collision impossible; hitting one
        // means the single-settlement invariant is already broken.
        if self.pending.lock().insert(id, entry).is_some() {
            panic!("correlation id {} allocated while still pending", id);
        }

        (id, rx)
    }

    /// Settle the pending call for `id`, removing it first so a second
    /// settlement attempt finds nothing. Returns false if no call with that
    /// id is pending (already settled, timed out, or channel closed).
    pub(crate) fn settle(&self, id: CallId, outcome: Result<Envelope<C>>) -> bool {
        let entry = self.pending.lock().remove(&id);
        match entry {
            Some(call) => {
                // The caller may have stopped waiting; a dropped receiver is
                // not an error.
                let _ = call.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop local bookkeeping for `id` without settling it (timeout and
    /// send-failure paths; the remote handler may still run).
    pub(crate) fn abandon(&self, id: CallId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Reject every pending call. Used by channel teardown.
    pub(crate) fn fail_all(&self, error: impl Fn() -> CallError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        for (id, call) in drained {
            tracing::debug!(
                id = %id,
                event = %call.event,
                age_ms = call.issued_at.elapsed().as_millis() as u64,
                "rejecting pending call"
            );
            let _ = call.tx.send(Err(error()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<C: Codec> std::fmt::Debug for CallDispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDispatcher")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}
