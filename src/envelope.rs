//! Wire shape of requests, responses and error responses.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{BincodeCodec, Codec};
use crate::error::{CallError, Result, TransportError, TransportResult};

pub const MAGIC: [u8; 4] = [0x58, 0x43, 0x41, 0x4C]; // XCAL
pub const VERSION: u8 = 1;
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;
pub const MIN_HEADER_SIZE: usize = 4 + 1 + 1 + 8 + 2 + 4;

/// Correlation token linking a request to its eventual settlement.
///
/// Unique per [`Channel`](crate::Channel) instance while the call is
/// outstanding; allocated from the channel's own counter, never from
/// process-global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl CallId {
    pub fn from_raw(id: u64) -> Self {
        CallId(id)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnvelopeKind {
    Request = 0,
    Response = 1,
    Error = 2,
    Notify = 3,
}

impl EnvelopeKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EnvelopeKind::Request),
            1 => Ok(EnvelopeKind::Response),
            2 => Ok(EnvelopeKind::Error),
            3 => Ok(EnvelopeKind::Notify),
            _ => Err(CallError::InvalidEnvelope(format!(
                "Unknown envelope kind: {}",
                value
            ))),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Which side of the error taxonomy an error response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// No handler was registered for the event at routing time.
    NoHandler,
    /// A registered handler failed or panicked.
    Handler,
}

/// Payload of an [`EnvelopeKind::Error`] envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn no_handler(event: &str) -> Self {
        Self {
            kind: FaultKind::NoHandler,
            message: format!("No handler registered for event '{}'", event),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Handler,
            message: message.into(),
        }
    }

    /// Reconstruct the caller-visible error for the call that this fault
    /// settled.
    pub fn into_call_error(self, event: &str) -> CallError {
        match self.kind {
            FaultKind::NoHandler => CallError::NoHandler(event.to_string()),
            FaultKind::Handler => CallError::Handler(self.message),
        }
    }
}

/// Unit of wire exchange between two channel endpoints.
#[derive(Debug, Clone)]
pub struct Envelope<C: Codec = BincodeCodec> {
    pub id: CallId,
    pub kind: EnvelopeKind,
    pub event: String,
    pub payload: Bytes,
    pub codec: C,
}

impl<C: Codec + Default> Envelope<C> {
    pub fn new(id: CallId, kind: EnvelopeKind, event: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id,
            kind,
            event: event.into(),
            payload,
            codec: C::default(),
        }
    }

    pub fn request<T: Serialize>(id: CallId, event: impl Into<String>, payload: &T) -> Result<Self> {
        let codec = C::default();
        let payload = codec.encode(payload)?;
        Ok(Self {
            id,
            kind: EnvelopeKind::Request,
            event: event.into(),
            payload: Bytes::from(payload),
            codec,
        })
    }

    pub fn request_raw(id: CallId, event: impl Into<String>, payload: Bytes) -> Self {
        Self::new(id, EnvelopeKind::Request, event, payload)
    }

    pub fn response<T: Serialize>(id: CallId, payload: &T) -> Result<Self> {
        let codec = C::default();
        let payload = codec.encode(payload)?;
        Ok(Self {
            id,
            kind: EnvelopeKind::Response,
            event: String::new(),
            payload: Bytes::from(payload),
            codec,
        })
    }

    pub fn response_raw(id: CallId, payload: Bytes) -> Self {
        Self::new(id, EnvelopeKind::Response, String::new(), payload)
    }

    /// Faults are small plain structs, fall back to an empty payload if
    /// encoding fails (cannot happen for the codecs shipped here).
    pub fn fault(id: CallId, fault: &Fault) -> Self {
        let codec = C::default();
        let payload = codec.encode(fault).unwrap_or_default();
        Self {
            id,
            kind: EnvelopeKind::Error,
            event: String::new(),
            payload: Bytes::from(payload),
            codec,
        }
    }

    pub fn notify<T: Serialize>(id: CallId, event: impl Into<String>, payload: &T) -> Result<Self> {
        let codec = C::default();
        let payload = codec.encode(payload)?;
        Ok(Self {
            id,
            kind: EnvelopeKind::Notify,
            event: event.into(),
            payload: Bytes::from(payload),
            codec,
        })
    }

    /// Decode envelope from wire bytes
    pub fn decode(mut buf: impl Buf) -> TransportResult<Self> {
        if buf.remaining() < MIN_HEADER_SIZE {
            return Err(TransportError::Protocol(
                "Buffer too small for envelope header".to_string(),
            ));
        }

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(TransportError::Protocol(format!(
                "Invalid magic bytes: {:?}",
                magic
            )));
        }

        let version = buf.get_u8();
        if version != VERSION {
            return Err(TransportError::Protocol(format!(
                "Unsupported protocol version: {}",
                version
            )));
        }

        let kind = EnvelopeKind::from_u8(buf.get_u8())
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let id = CallId(buf.get_u64_le());

        let event_len = buf.get_u16_le() as usize;
        let payload_len = buf.get_u32_le() as usize;

        if buf.remaining() < event_len + payload_len {
            return Err(TransportError::Protocol("Incomplete envelope".to_string()));
        }

        let mut event_bytes = vec![0u8; event_len];
        buf.copy_to_slice(&mut event_bytes);
        let event = String::from_utf8(event_bytes)
            .map_err(|e| TransportError::Protocol(format!("Invalid event name: {}", e)))?;

        let mut payload_bytes = vec![0u8; payload_len];
        buf.copy_to_slice(&mut payload_bytes);

        Ok(Self {
            id,
            kind,
            event,
            payload: Bytes::from(payload_bytes),
            codec: C::default(),
        })
    }
}

impl<C: Codec> Envelope<C> {
    /// Encode envelope to wire bytes
    pub fn encode(&self) -> TransportResult<BytesMut> {
        let event_bytes = self.event.as_bytes();
        let event_len = event_bytes.len();

        if event_len > u16::MAX as usize {
            return Err(TransportError::Protocol("Event name too long".to_string()));
        }

        let total_size = MIN_HEADER_SIZE + event_len + self.payload.len();

        if total_size > MAX_ENVELOPE_SIZE {
            return Err(TransportError::MessageTooLarge {
                size: total_size,
                max: MAX_ENVELOPE_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total_size);

        buf.put_slice(&MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.kind.to_u8());
        buf.put_u64_le(self.id.0);
        buf.put_u16_le(event_len as u16);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(event_bytes);
        buf.put_slice(&self.payload);

        Ok(buf)
    }

    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        self.codec.decode(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
        note: String,
    }

    #[test]
    fn test_request_roundtrip() {
        let ping = Ping {
            seq: 7,
            note: "hello".to_string(),
        };

        let env = Envelope::<BincodeCodec>::request(CallId(1), "ping", &ping).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Request);
        assert_eq!(env.event, "ping");

        let mut buf = env.encode().unwrap();
        let decoded: Envelope = Envelope::decode(&mut buf).unwrap();

        assert_eq!(decoded.id, CallId(1));
        assert_eq!(decoded.kind, EnvelopeKind::Request);
        assert_eq!(decoded.event, "ping");

        let decoded_ping: Ping = decoded.decode_payload().unwrap();
        assert_eq!(decoded_ping, ping);
    }

    #[test]
    fn test_response_keeps_correlation_id() {
        let env = Envelope::<BincodeCodec>::response(CallId(42), &"pong").unwrap();
        let mut buf = env.encode().unwrap();
        let decoded: Envelope = Envelope::decode(&mut buf).unwrap();

        assert_eq!(decoded.id, CallId(42));
        assert_eq!(decoded.kind, EnvelopeKind::Response);
        assert_eq!(decoded.event, "");

        let body: String = decoded.decode_payload().unwrap();
        assert_eq!(body, "pong");
    }

    #[test]
    fn test_fault_roundtrip() {
        let env = Envelope::<BincodeCodec>::fault(CallId(9), &Fault::no_handler("missing"));
        let mut buf = env.encode().unwrap();
        let decoded: Envelope = Envelope::decode(&mut buf).unwrap();

        assert_eq!(decoded.kind, EnvelopeKind::Error);
        let fault: Fault = decoded.decode_payload().unwrap();
        assert_eq!(fault.kind, FaultKind::NoHandler);
        assert!(fault.message.contains("missing"));

        match fault.into_call_error("missing") {
            CallError::NoHandler(event) => assert_eq!(event, "missing"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_json_codec_payload() {
        let ping = Ping {
            seq: 1,
            note: "json".to_string(),
        };

        let env = Envelope::<JsonCodec>::request(CallId(3), "ping", &ping).unwrap();
        let payload_str = std::str::from_utf8(&env.payload).unwrap();
        assert!(payload_str.contains("\"note\":\"json\""));

        let mut buf = env.encode().unwrap();
        let decoded: Envelope<JsonCodec> = Envelope::decode(&mut buf).unwrap();
        let decoded_ping: Ping = decoded.decode_payload().unwrap();
        assert_eq!(decoded_ping, ping);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let env = Envelope::<BincodeCodec>::response(CallId(1), &()).unwrap();
        let mut buf = env.encode().unwrap();
        buf[0] = 0xFF;

        let result: TransportResult<Envelope> = Envelope::decode(&mut buf);
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let env = Envelope::<BincodeCodec>::response(CallId(1), &()).unwrap();
        let mut buf = env.encode().unwrap();
        buf[4] = VERSION + 1;

        let result: TransportResult<Envelope> = Envelope::decode(&mut buf);
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let env = Envelope::<BincodeCodec>::response(CallId(1), &()).unwrap();
        let mut buf = env.encode().unwrap();
        buf[5] = 200;

        let result: TransportResult<Envelope> = Envelope::decode(&mut buf);
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_envelope() {
        let env = Envelope::<BincodeCodec>::request(CallId(1), "ping", &"payload").unwrap();
        let buf = env.encode().unwrap();
        let truncated = &buf[..buf.len() - 4];

        let result: TransportResult<Envelope> = Envelope::decode(truncated);
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }
}
