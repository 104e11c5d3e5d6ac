use thiserror::Error;

/// Failure modes visible to callers of [`Channel::call`](crate::Channel::call)
/// and returned by answer handlers.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("No handler registered for event '{0}'")]
    NoHandler(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Call '{event}' timed out after {duration_ms}ms")]
    Timeout { event: String, duration_ms: u64 },

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Invalid event name: {0}")]
    InvalidEvent(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Send failed: {reason}")]
    SendFailed { reason: String },

    #[error("Receive failed: {reason}")]
    ReceiveFailed { reason: String },

    #[error("Transport {operation} timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64, operation: String },

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CallError>;
pub type TransportResult<T> = std::result::Result<T, TransportError>;

impl From<bincode::Error> for CallError {
    fn from(err: bincode::Error) -> Self {
        CallError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::Serialization(err.to_string())
    }
}
