//! crosscall - typed request/response channels between isolated execution contexts
//!
//! Builds a reliable call/answer abstraction, with correlation, multiplexing
//! and error propagation, on top of a transport that only promises
//! best-effort, unordered, asynchronous delivery of opaque messages.
//!
//! ```no_run
//! use crosscall::{Channel, EnvelopeTransportAdapter, LoopbackConfig, LoopbackFrameTransport};
//!
//! # async fn demo() -> crosscall::Result<()> {
//! let (left, right) =
//!     LoopbackFrameTransport::create_pair("demo", LoopbackConfig::default())?;
//! let a = Channel::create(EnvelopeTransportAdapter::new(left));
//! let b = Channel::create(EnvelopeTransportAdapter::new(right));
//!
//! b.answer("ping", |_: ()| async move { Ok("pong".to_string()) });
//! let reply: String = a.call("ping", &()).await?;
//! assert_eq!(reply, "pong");
//! # Ok(())
//! # }
//! ```
pub mod channel;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod transport;

mod dispatch;
mod router;

pub use channel::{Channel, ChannelConfig};
pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use envelope::{CallId, Envelope, EnvelopeKind, Fault, FaultKind};
pub use error::{CallError, Result, TransportError, TransportResult};
pub use registry::AnswerHandler;
pub use transport::envelope::{EnvelopeTransport, EnvelopeTransportAdapter};
pub use transport::loopback::{LoopbackConfig, LoopbackFrameTransport};
pub use transport::{FrameTransport, TransportStats};
