//! In-process loopback transport pair.
//!
//! Each side's outbound frames feed the other side's inbound queue, giving
//! two channel endpoints a point-to-point link inside one process. This is
//! the transport used by the crate's own tests and demos; real deployments
//! supply their own [`FrameTransport`] over whatever boundary they have.

use async_trait::async_trait;
use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{TransportError, TransportResult};
use crate::transport::{FrameTransport, TransportStats};

pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Configuration for the in-process loopback transport.
#[derive(Clone, Debug)]
pub struct LoopbackConfig {
    pub buffer_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl LoopbackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Default)]
struct LoopbackStats {
    messages_sent: u64,
    messages_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
}

/// One endpoint of an in-process loopback pair.
pub struct LoopbackFrameTransport {
    sender: Sender<Bytes>,
    receiver: Receiver<Bytes>,
    config: LoopbackConfig,
    stats: Arc<Mutex<LoopbackStats>>,
    closed: AtomicBool,
    name: String,
}

impl LoopbackFrameTransport {
    /// Create a pair of connected transports.
    pub fn create_pair(
        name: impl Into<String>,
        config: LoopbackConfig,
    ) -> TransportResult<(Self, Self)> {
        let name = name.into();
        let capacity = (config.buffer_size / 1024).max(16);

        let (tx1, rx1) = bounded(capacity);
        let (tx2, rx2) = bounded(capacity);

        let transport1 = Self {
            sender: tx1,
            receiver: rx2,
            config: config.clone(),
            stats: Arc::new(Mutex::new(LoopbackStats::default())),
            closed: AtomicBool::new(false),
            name: format!("{}-a", name),
        };

        let transport2 = Self {
            sender: tx2,
            receiver: rx1,
            config,
            stats: Arc::new(Mutex::new(LoopbackStats::default())),
            closed: AtomicBool::new(false),
            name: format!("{}-b", name),
        };

        Ok((transport1, transport2))
    }
}

#[async_trait]
impl FrameTransport for LoopbackFrameTransport {
    async fn send_frame(&self, data: &[u8]) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let bytes = Bytes::copy_from_slice(data);

        let result = if let Some(timeout) = self.config.write_timeout {
            tokio::select! {
                result = tokio::task::spawn_blocking({
                    let sender = self.sender.clone();
                    let bytes = bytes.clone();
                    move || sender.send(bytes)
                }) => {
                    result
                        .map_err(|e| TransportError::SendFailed {
                            reason: e.to_string(),
                        })?
                        .map_err(|_| TransportError::SendFailed {
                            reason: "Peer disconnected".into(),
                        })
                }
                _ = tokio::time::sleep(timeout) => {
                    Err(TransportError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                        operation: "send".into(),
                    })
                }
            }
        } else {
            self.sender
                .send(bytes)
                .map_err(|_| TransportError::SendFailed {
                    reason: "Peer disconnected".into(),
                })
        };

        if result.is_ok() {
            let mut stats = self.stats.lock();
            stats.messages_sent += 1;
            stats.bytes_sent += data.len() as u64;
        }

        result
    }

    async fn recv_frame(&self) -> TransportResult<Bytes> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let bytes = if let Some(timeout) = self.config.read_timeout {
            tokio::select! {
                result = tokio::task::spawn_blocking({
                    let receiver = self.receiver.clone();
                    move || receiver.recv()
                }) => {
                    result
                        .map_err(|e| TransportError::ReceiveFailed {
                            reason: e.to_string(),
                        })?
                        .map_err(|_| TransportError::ReceiveFailed {
                            reason: "Peer disconnected".into(),
                        })?
                }
                _ = tokio::time::sleep(timeout) => {
                    return Err(TransportError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                        operation: "receive".into(),
                    });
                }
            }
        } else {
            let receiver = self.receiver.clone();
            tokio::task::spawn_blocking(move || receiver.recv())
                .await
                .map_err(|e| TransportError::ReceiveFailed {
                    reason: e.to_string(),
                })?
                .map_err(|_| TransportError::ReceiveFailed {
                    reason: "Peer disconnected".into(),
                })?
        };

        let mut stats = self.stats.lock();
        stats.messages_received += 1;
        stats.bytes_received += bytes.len() as u64;

        Ok(bytes)
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn stats(&self) -> Option<TransportStats> {
        let stats = self.stats.lock();
        Some(TransportStats {
            messages_sent: stats.messages_sent,
            messages_received: stats.messages_received,
            bytes_sent: stats.bytes_sent,
            bytes_received: stats.bytes_received,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LoopbackFrameTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackFrameTransport")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}
