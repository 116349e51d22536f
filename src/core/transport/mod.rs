//! Transport layer for the supported connection types
//!
//! A transport is a thin capability object: open, close, raw write, and a
//! stream of inbound byte chunks. Everything protocol-shaped (framing,
//! correlation, send serialization) lives above it in
//! [`Channel`](crate::core::channel::Channel), so the core logic is
//! transport-agnostic and testable without real hardware.

mod serial;
mod tcp;

pub use serial::{list_ports, SerialConfig, SerialParity, SerialTransport};
pub use tcp::{TcpConfig, TcpTransport};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Size of one inbound read from the wire
pub(crate) const READ_CHUNK: usize = 4096;
/// Depth of the inbound chunk queue between the read pump and the channel
pub(crate) const INBOUND_QUEUE: usize = 256;

/// Transport configuration variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Serial port connection
    Serial(SerialConfig),
    /// TCP client connection
    Tcp(TcpConfig),
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Serial port
    Serial,
    /// TCP client
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Tcp => write!(f, "TCP"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("connection timeout after {0} seconds")]
    Timeout(u64),

    /// Port not found
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted on a closed transport
    #[error("not connected")]
    NotConnected,

    /// Peer went away
    #[error("disconnected")]
    Disconnected,
}

/// Capability interface implemented by each transport.
///
/// Inbound data is delivered as raw chunks on the queue returned by
/// [`take_inbound`](RawTransport::take_inbound); the queue closes when the
/// underlying connection dies. Exactly one consumer (the owning channel's
/// receive task) reads it.
#[async_trait]
pub trait RawTransport: Send {
    /// Connect to the target
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Disconnect from the target
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_open(&self) -> bool;

    /// Write raw bytes to the wire
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Take the inbound chunk stream. Available exactly once per open.
    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Bytes>>;

    /// Get transport type
    fn kind(&self) -> TransportKind;

    /// Get connection info string
    fn peer_info(&self) -> String;
}

/// Create a transport instance from configuration
pub fn create_transport(config: &TransportConfig) -> Box<dyn RawTransport> {
    match config {
        TransportConfig::Serial(cfg) => Box::new(SerialTransport::new(cfg.clone())),
        TransportConfig::Tcp(cfg) => Box::new(TcpTransport::new(cfg.clone())),
    }
}
