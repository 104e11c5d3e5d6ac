//! Answer registry: event name to handler bindings.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::Codec;
use crate::error::Result;

/// A response-producing handler bound to an event name.
///
/// Implemented by the raw and typed wrappers built through
/// [`Channel::answer`](crate::Channel::answer) and
/// [`Channel::answer_raw`](crate::Channel::answer_raw); implement it directly
/// to bind a stateful handler via [`Channel::bind`](crate::Channel::bind).
#[async_trait]
pub trait AnswerHandler: Send + Sync {
    async fn handle(&self, payload: Bytes) -> Result<Bytes>;
}

/// Handler over raw payload bytes.
pub(crate) struct RawAnswer<F> {
    func: F,
}

impl<F, Fut> RawAnswer<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    pub(crate) fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> AnswerHandler for RawAnswer<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    async fn handle(&self, payload: Bytes) -> Result<Bytes> {
        (self.func)(payload).await
    }
}

/// Handler that decodes its argument and encodes its result with the
/// channel's codec.
pub(crate) struct TypedAnswer<Req, Resp, F, C> {
    func: F,
    codec: C,
    _phantom: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F, Fut, C> TypedAnswer<Req, Resp, F, C>
where
    Req: for<'de> Deserialize<'de> + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
    C: Codec + Default,
{
    pub(crate) fn new(func: F) -> Self {
        Self {
            func,
            codec: C::default(),
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<Req, Resp, F, Fut, C> AnswerHandler for TypedAnswer<Req, Resp, F, C>
where
    Req: for<'de> Deserialize<'de> + Send + Sync + 'static,
    Resp: Serialize + Send + Sync + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
    C: Codec + Default,
{
    async fn handle(&self, payload: Bytes) -> Result<Bytes> {
        let request: Req = self.codec.decode(&payload)?;
        let response = (self.func)(request).await?;
        Ok(Bytes::from(self.codec.encode(&response)?))
    }
}

/// Per-channel table of event-name to handler bindings.
///
/// At most one handler per event name; a later binding for the same name
/// replaces the earlier one.
pub(crate) struct AnswerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn AnswerHandler>>>,
}

impl AnswerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn bind(&self, event: impl Into<String>, handler: Arc<dyn AnswerHandler>) {
        let event = event.into();
        if self.handlers.write().insert(event.clone(), handler).is_some() {
            tracing::debug!(event = %event, "answer handler replaced");
        }
    }

    pub(crate) fn lookup(&self, event: &str) -> Option<Arc<dyn AnswerHandler>> {
        self.handlers.read().get(event).cloned()
    }

    pub(crate) fn clear(&self) {
        self.handlers.write().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }
}
