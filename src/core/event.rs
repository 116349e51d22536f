//! Channel event stream
//!
//! Every channel publishes one structured event stream consumed by
//! logging and UI subscribers. Fan-out uses a broadcast channel: each
//! subscriber receives on its own task, so a slow or panicking consumer
//! cannot stall the I/O path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Capacity of a channel's event ring buffer
pub const EVENT_CAPACITY: usize = 1024;

/// Classification of a channel event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Connection established
    Connected,
    /// Connection closed
    Disconnected,
    /// Connection attempt failed
    ConnectionError,
    /// Payload transmitted
    Tx,
    /// Frame received
    Rx,
    /// Transmit failure
    TxError,
    /// Receive failure
    RxError,
    /// Operation timed out
    Timeout,
    /// Repeated errors crossed the burst threshold; operator attention needed
    Inspection,
    /// Malformed or protocol-violating traffic
    ProtocolError,
    /// Device command issued
    Command,
    /// Device command failed or was rejected
    CommandError,
    /// Modbus slave returned an exception response
    SlaveException,
    /// Modbus transport I/O failure
    IoException,
    /// Unclassified failure during a protocol call
    UnexpectedException,
    /// Protocol call completed, message carries the rendered result
    Success,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One immutable record on a channel's event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Name of the channel that produced the event
    pub source: String,
    /// Event classification
    pub kind: EventKind,
    /// Human-readable detail
    pub message: String,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

impl ChannelEvent {
    /// Create an event stamped with the current time
    pub fn new(source: &str, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}] : {}", self.source, self.kind, self.message)
    }
}

/// Create a new event fan-out pair
pub fn event_channel() -> (
    broadcast::Sender<ChannelEvent>,
    broadcast::Receiver<ChannelEvent>,
) {
    broadcast::channel(EVENT_CAPACITY)
}
