//! Channel façade: typed calls and answers over one transport endpoint.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use bytes::Bytes;

use crate::codec::{BincodeCodec, Codec};
use crate::dispatch::CallDispatcher;
use crate::envelope::{CallId, Envelope, EnvelopeKind, Fault};
use crate::error::{CallError, Result};
use crate::registry::{AnswerHandler, AnswerRegistry, RawAnswer, TypedAnswer};
use crate::router::MessageRouter;
use crate::transport::TransportStats;
use crate::transport::envelope::EnvelopeTransport;

/// Channel tuning knobs.
///
/// The default deadline is `None`: a call without an explicit timeout waits
/// indefinitely for its settlement.
#[derive(Clone, Debug, Default)]
pub struct ChannelConfig {
    pub default_timeout: Option<Duration>,
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}

/// One endpoint of a request/response boundary pair.
///
/// A channel owns its pending-call table, its answer registry and its id
/// counter; nothing is shared across independently created channels. Clones
/// share the same endpoint state, which lets answer handlers issue nested
/// calls through a captured clone.
pub struct Channel<T, C = BincodeCodec>
where
    T: EnvelopeTransport<C>,
    C: Codec,
{
    transport: Arc<T>,
    dispatcher: Arc<CallDispatcher<C>>,
    registry: Arc<AnswerRegistry>,
    closed: Arc<AtomicBool>,
    config: ChannelConfig,
    codec: C,
    router_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<T: EnvelopeTransport<BincodeCodec> + 'static> Channel<T, BincodeCodec> {
    /// Create a channel over `transport` and start routing its inbound
    /// envelopes.
    pub fn create(transport: T) -> Self {
        Self::with_config(transport, ChannelConfig::default())
    }

    pub fn with_config(transport: T, config: ChannelConfig) -> Self {
        Self::with_codec_and_config(transport, BincodeCodec, config)
    }
}

impl<T, C> Channel<T, C>
where
    T: EnvelopeTransport<C> + 'static,
    C: Codec + Clone + Default + Send + Sync + 'static,
{
    pub fn with_codec(transport: T, codec: C) -> Self {
        Self::with_codec_and_config(transport, codec, ChannelConfig::default())
    }

    pub fn with_codec_and_config(transport: T, codec: C, config: ChannelConfig) -> Self {
        let transport = Arc::new(transport);
        let dispatcher = Arc::new(CallDispatcher::new());
        let registry = Arc::new(AnswerRegistry::new());
        let closed = Arc::new(AtomicBool::new(false));

        let router = MessageRouter::new(
            transport.clone(),
            dispatcher.clone(),
            registry.clone(),
            closed.clone(),
        );
        let router_task = tokio::spawn(router.run());

        Self {
            transport,
            dispatcher,
            registry,
            closed,
            config,
            codec,
            router_task: Arc::new(Mutex::new(Some(router_task))),
        }
    }

    /// Issue a call and wait for its settlement.
    ///
    /// Resolves with the peer handler's result, or rejects with the
    /// reconstructed failure ([`CallError::NoHandler`],
    /// [`CallError::Handler`]), [`CallError::Timeout`] when a configured
    /// deadline elapses, or [`CallError::ChannelClosed`].
    pub async fn call<Req, Resp>(&self, event: &str, payload: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        self.call_with_deadline(event, payload, self.config.default_timeout)
            .await
    }

    pub async fn call_with_timeout<Req, Resp>(
        &self,
        event: &str,
        payload: &Req,
        timeout: Duration,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        self.call_with_deadline(event, payload, Some(timeout)).await
    }

    async fn call_with_deadline<Req, Resp>(
        &self,
        event: &str,
        payload: &Req,
        deadline: Option<Duration>,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        self.check_callable(event)?;

        let (id, rx) = self.dispatcher.issue(event);
        let envelope = match Envelope::request(id, event, payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.dispatcher.abandon(id);
                return Err(e);
            }
        };

        if let Err(e) = self.transport.send(&envelope).await {
            self.dispatcher.abandon(id);
            return Err(e.into());
        }

        let settled = self.await_settlement(event, id, rx, deadline).await?;
        let payload = self.settled_payload(event, settled)?;
        self.codec.decode(&payload)
    }

    /// Issue a call with a pre-encoded payload, returning the raw response
    /// payload.
    pub async fn call_raw(&self, event: &str, payload: Bytes) -> Result<Bytes> {
        self.call_raw_with_deadline(event, payload, self.config.default_timeout)
            .await
    }

    pub async fn call_raw_with_timeout(
        &self,
        event: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        self.call_raw_with_deadline(event, payload, Some(timeout))
            .await
    }

    async fn call_raw_with_deadline(
        &self,
        event: &str,
        payload: Bytes,
        deadline: Option<Duration>,
    ) -> Result<Bytes> {
        self.check_callable(event)?;

        let (id, rx) = self.dispatcher.issue(event);
        let envelope = Envelope::request_raw(id, event, payload);

        if let Err(e) = self.transport.send(&envelope).await {
            self.dispatcher.abandon(id);
            return Err(e.into());
        }

        let settled = self.await_settlement(event, id, rx, deadline).await?;
        self.settled_payload(event, settled)
    }

    /// Send a one-way cast: the peer handler runs, no reply is produced and
    /// nothing is tracked locally.
    pub async fn cast<Req: Serialize>(&self, event: &str, payload: &Req) -> Result<()> {
        self.check_callable(event)?;
        let envelope = Envelope::notify(self.dispatcher.next_id(), event, payload)?;
        self.transport.send(&envelope).await.map_err(Into::into)
    }

    /// Register a typed handler for `event`, replacing any prior handler
    /// bound to the same name.
    ///
    /// Takes effect for every request routed after this point; a request
    /// already in flight is served by whatever binding exists when it is
    /// processed.
    pub fn answer<Req, Resp, F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        Req: for<'de> Deserialize<'de> + Send + Sync + 'static,
        Resp: Serialize + Send + Sync + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        self.bind(event, Arc::new(TypedAnswer::<Req, Resp, F, C>::new(handler)));
    }

    /// Register a handler over raw payload bytes.
    pub fn answer_raw<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.bind(event, Arc::new(RawAnswer::new(handler)));
    }

    /// Bind a handler object under `event` (last write wins).
    pub fn bind(&self, event: impl Into<String>, handler: Arc<dyn AnswerHandler>) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!("ignoring answer registration on closed channel");
            return;
        }
        self.registry.bind(event, handler);
    }

    /// Tear the channel down: reject every pending call with
    /// [`CallError::ChannelClosed`], clear the answer registry, stop routing
    /// and detach from the transport. Idempotent; any later call rejects
    /// immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = self.router_task.lock().take() {
            task.abort();
        }
        self.dispatcher.fail_all(|| CallError::ChannelClosed);
        self.registry.clear();

        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "transport close failed");
        }
        tracing::debug!("channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.transport.is_connected()
    }

    /// Number of calls issued but not yet settled.
    pub fn pending_calls(&self) -> usize {
        self.dispatcher.len()
    }

    /// Number of events with a registered answer handler.
    pub fn answer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> Option<TransportStats> {
        self.transport.stats()
    }

    pub fn transport(&self) -> Arc<T> {
        self.transport.clone()
    }

    fn check_callable(&self, event: &str) -> Result<()> {
        if event.is_empty() {
            return Err(CallError::InvalidEvent(
                "event name must not be empty".to_string(),
            ));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::ChannelClosed);
        }
        Ok(())
    }

    async fn await_settlement(
        &self,
        event: &str,
        id: CallId,
        rx: oneshot::Receiver<Result<Envelope<C>>>,
        deadline: Option<Duration>,
    ) -> Result<Envelope<C>> {
        let outcome = match deadline {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Local bookkeeping only; the remote handler may still
                    // run and its late reply will be discarded.
                    self.dispatcher.abandon(id);
                    return Err(CallError::Timeout {
                        event: event.to_string(),
                        duration_ms: timeout.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| CallError::ChannelClosed)?
    }

    fn settled_payload(&self, event: &str, envelope: Envelope<C>) -> Result<Bytes> {
        match envelope.kind {
            EnvelopeKind::Response => Ok(envelope.payload),
            EnvelopeKind::Error => {
                let fault: Fault = self
                    .codec
                    .decode(&envelope.payload)
                    .unwrap_or_else(|_| Fault::handler("Unknown failure"));
                Err(fault.into_call_error(event))
            }
            other => Err(CallError::InvalidEnvelope(format!(
                "Unexpected envelope kind {:?} for settled call",
                other
            ))),
        }
    }
}

impl<T, C> Clone for Channel<T, C>
where
    T: EnvelopeTransport<C>,
    C: Codec + Clone,
{
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            dispatcher: self.dispatcher.clone(),
            registry: self.registry.clone(),
            closed: self.closed.clone(),
            config: self.config.clone(),
            codec: self.codec.clone(),
            router_task: self.router_task.clone(),
        }
    }
}

impl<T, C> Drop for Channel<T, C>
where
    T: EnvelopeTransport<C>,
    C: Codec,
{
    fn drop(&mut self) {
        // Last endpoint handle going away; stop the routing loop.
        if Arc::strong_count(&self.router_task) == 1 {
            if let Some(task) = self.router_task.lock().take() {
                task.abort();
            }
        }
    }
}

impl<T, C> std::fmt::Debug for Channel<T, C>
where
    T: EnvelopeTransport<C>,
    C: Codec,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("pending_calls", &self.dispatcher.len())
            .field("answers", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::transport::envelope::EnvelopeTransportAdapter;
    use crate::transport::loopback::{LoopbackConfig, LoopbackFrameTransport};

    type LoopbackChannel = Channel<EnvelopeTransportAdapter<LoopbackFrameTransport>>;

    fn pair(name: &str) -> (LoopbackChannel, LoopbackChannel) {
        let (a, b) = LoopbackFrameTransport::create_pair(name, LoopbackConfig::default()).unwrap();
        (
            Channel::create(EnvelopeTransportAdapter::new(a)),
            Channel::create(EnvelopeTransportAdapter::new(b)),
        )
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AddRequest {
        a: i32,
        b: i32,
    }

    #[tokio::test]
    async fn test_call_settles_with_handler_result() {
        let (a, b) = pair("ping");
        b.answer("ping", |_: ()| async move { Ok("pong".to_string()) });

        let reply: String = a.call("ping", &()).await.unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn test_typed_call_roundtrip() {
        let (a, b) = pair("add");
        b.answer("add", |req: AddRequest| async move { Ok(req.a + req.b) });

        let sum: i32 = a.call("add", &AddRequest { a: 10, b: 32 }).await.unwrap();
        assert_eq!(sum, 42);
        assert_eq!(a.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_without_handler_rejects() {
        let (a, _b) = pair("missing");

        let result: Result<()> = a.call("missing", &()).await;
        match result {
            Err(CallError::NoHandler(event)) => assert_eq!(event, "missing"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_settle_independently() {
        let (a, b) = pair("concurrent");
        b.answer("slow", |tag: String| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(format!("slow:{}", tag))
        });
        b.answer("fast", |tag: String| async move { Ok(format!("fast:{}", tag)) });

        let one = "1".to_string();
        let two = "2".to_string();
        let (slow, fast) = tokio::join!(
            a.call::<String, String>("slow", &one),
            a.call::<String, String>("fast", &two),
        );

        assert_eq!(slow.unwrap(), "slow:1");
        assert_eq!(fast.unwrap(), "fast:2");
    }

    #[tokio::test]
    async fn test_handler_failure_rejects_without_contamination() {
        let (a, b) = pair("boom");
        b.answer("boom", |_: ()| async move {
            Err::<(), _>(CallError::Handler("nope".to_string()))
        });
        b.answer("ping", |_: ()| async move { Ok("pong".to_string()) });

        let result: Result<()> = a.call("boom", &()).await;
        match result {
            Err(CallError::Handler(description)) => assert!(description.contains("nope")),
            other => panic!("unexpected outcome: {:?}", other),
        }

        // An unrelated call on the same channel still succeeds.
        let reply: String = a.call("ping", &()).await.unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_handler_error() {
        let (a, b) = pair("panic");
        b.answer("explode", |_: ()| async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });

        let result: Result<()> = a.call("explode", &()).await;
        match result {
            Err(CallError::Handler(description)) => assert!(description.contains("kaboom")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_subsequent_calls() {
        let (a, b) = pair("close");
        b.answer("hang", |_: ()| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });

        let caller = a.clone();
        let in_flight =
            tokio::spawn(async move { caller.call::<(), ()>("hang", &()).await });

        // Let the call reach the pending table before tearing down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.pending_calls(), 1);

        a.close().await;

        let settled = in_flight.await.unwrap();
        assert!(matches!(settled, Err(CallError::ChannelClosed)));
        assert_eq!(a.pending_calls(), 0);

        let after: Result<()> = a.call("hang", &()).await;
        assert!(matches!(after, Err(CallError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _b) = pair("close-twice");
        a.close().await;
        a.close().await;
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn test_call_timeout_and_orphaned_reply_discard() {
        let (a, b) = pair("timeout");
        b.answer("slowish", |_: ()| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("late".to_string())
        });
        b.answer("ping", |_: ()| async move { Ok("pong".to_string()) });

        let result: Result<String> =
            a.call_with_timeout("slowish", &(), Duration::from_millis(20)).await;
        match result {
            Err(CallError::Timeout { event, .. }) => assert_eq!(event, "slowish"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(a.pending_calls(), 0);

        // The late reply arrives after settlement and is discarded; the
        // channel keeps working.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let reply: String = a.call("ping", &()).await.unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn test_default_timeout_from_config() {
        let (t1, _t2) =
            LoopbackFrameTransport::create_pair("cfg", LoopbackConfig::default()).unwrap();
        let a = Channel::with_config(
            EnvelopeTransportAdapter::new(t1),
            ChannelConfig::new().with_default_timeout(Duration::from_millis(30)),
        );

        // Peer never answers; the configured deadline settles the call.
        let result: Result<()> = a.call("void", &()).await;
        assert!(matches!(result, Err(CallError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_either_side_may_call_or_answer() {
        let (a, b) = pair("symmetric");
        a.answer("echo", |x: String| async move { Ok(x) });
        b.answer("ping", |_: ()| async move { Ok("pong".to_string()) });

        let echoed: String = b.call("echo", &"hi".to_string()).await.unwrap();
        assert_eq!(echoed, "hi");

        let reply: String = a.call("ping", &()).await.unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn test_handler_may_issue_nested_calls() {
        let (a, b) = pair("nested");
        a.answer("inner", |x: i32| async move { Ok(x + 1) });

        let back_channel = b.clone();
        b.answer("outer", move |x: i32| {
            let peer = back_channel.clone();
            async move { peer.call::<i32, i32>("inner", &x).await }
        });

        let result: i32 = a.call("outer", &7).await.unwrap();
        assert_eq!(result, 8);
    }

    #[tokio::test]
    async fn test_answer_override_is_last_write_wins() {
        let (a, b) = pair("override");
        b.answer("greet", |_: ()| async move { Ok("first".to_string()) });
        b.answer("greet", |_: ()| async move { Ok("second".to_string()) });

        let reply: String = a.call("greet", &()).await.unwrap();
        assert_eq!(reply, "second");
        assert_eq!(b.answer_count(), 1);
    }

    #[tokio::test]
    async fn test_cast_invokes_handler_without_reply() {
        use std::sync::atomic::AtomicU32;

        let (a, b) = pair("cast");
        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_handler = seen.clone();
        b.answer("log", move |_line: String| {
            let seen = seen_in_handler.clone();
            async move {
                seen.fetch_add(1, Ordering::Release);
                Ok(())
            }
        });

        a.cast("log", &"hello".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::Acquire), 1);
        assert_eq!(a.pending_calls(), 0);

        // A cast for an unregistered event is dropped, not an error.
        a.cast("unknown", &()).await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_call_roundtrip() {
        let (a, b) = pair("raw");
        b.answer_raw("reverse", |payload: Bytes| async move {
            let mut data = payload.to_vec();
            data.reverse();
            Ok(Bytes::from(data))
        });

        let reply = a
            .call_raw("reverse", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(reply.as_ref(), b"cba");
    }

    #[tokio::test]
    async fn test_empty_event_name_is_rejected() {
        let (a, _b) = pair("empty");
        let result: Result<()> = a.call("", &()).await;
        assert!(matches!(result, Err(CallError::InvalidEvent(_))));
    }

    #[tokio::test]
    async fn test_answer_after_close_is_ignored() {
        let (_a, b) = pair("late-answer");
        b.close().await;
        b.answer("late", |_: ()| async move { Ok(()) });
        assert_eq!(b.answer_count(), 0);
    }

    #[tokio::test]
    async fn test_json_codec_channel() {
        let (t1, t2) =
            LoopbackFrameTransport::create_pair("json", LoopbackConfig::default()).unwrap();
        let a = Channel::with_codec(
            EnvelopeTransportAdapter::<_, JsonCodec>::with_codec(t1),
            JsonCodec,
        );
        let b = Channel::with_codec(
            EnvelopeTransportAdapter::<_, JsonCodec>::with_codec(t2),
            JsonCodec,
        );

        b.answer("add", |req: AddRequest| async move { Ok(req.a + req.b) });
        let sum: i32 = a.call("add", &AddRequest { a: 2, b: 3 }).await.unwrap();
        assert_eq!(sum, 5);
    }
}
