//! Channel: one logical communication endpoint
//!
//! A [`Channel`] composes a raw transport with the shared protocol
//! machinery: frame reassembly, pending-request correlation, serialized
//! sends, a timed request/response exchange, background polling, and the
//! event fan-out. Protocol specifics (unsolicited-frame parsing, poll
//! cycles, post-open setup) plug in through [`FrameHandler`].

use crate::core::burst::ErrorBurst;
use crate::core::correlator::Correlator;
use crate::core::event::{event_channel, ChannelEvent, EventKind};
use crate::core::framing::{FrameSplitter, Framing};
use crate::core::transport::{create_transport, RawTransport, TransportConfig, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Default delay between background poll cycles
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name, used as the event source tag
    pub name: String,
    /// Transport to open
    pub transport: TransportConfig,
    /// Start the background poll task on open
    #[serde(default)]
    pub background_poll: bool,
    /// Hand unsolicited frames to the protocol handler
    #[serde(default = "default_true")]
    pub process_unsolicited: bool,
    /// Delay between background poll cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl ChannelConfig {
    /// Create a configuration with default polling behavior
    pub fn new(name: &str, transport: TransportConfig) -> Self {
        Self {
            name: name.to_string(),
            transport,
            background_poll: false,
            process_unsolicited: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Protocol plug-in point for a channel.
///
/// Implementations parse unsolicited frames, run one poll cycle at a
/// time, and perform post-open device setup. All hooks receive the
/// channel so they can send, exchange, and emit events.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Called for every inbound frame no pending exchange claimed
    fn on_frame(&self, link: &Channel, frame: &[u8]);

    /// Post-open setup (e.g. switch the device into remote mode)
    async fn init(&self, _link: &Channel) {}

    /// One background poll cycle; must not panic on device faults
    async fn poll(&self, _link: &Channel) {}
}

struct ChannelTasks {
    rx: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
}

struct ChannelInner {
    id: Uuid,
    config: ChannelConfig,
    framing: Framing,
    transport: AsyncMutex<Box<dyn RawTransport>>,
    events: broadcast::Sender<ChannelEvent>,
    /// One-slot gate serializing every outbound write
    send_gate: AsyncMutex<()>,
    correlator: Correlator,
    burst: parking_lot::Mutex<ErrorBurst>,
    handler: parking_lot::RwLock<Option<Arc<dyn FrameHandler>>>,
    open: AtomicBool,
    unsolicited: AtomicBool,
    tasks: parking_lot::Mutex<ChannelTasks>,
}

/// One logical communication endpoint (serial port or socket) plus its
/// framing, correlation, and send-serialization state.
///
/// Cheap to clone; clones share the same endpoint. Background tasks stay
/// alive until [`close`](Channel::close) is called — dropping all clones
/// without closing leaves an opened channel's tasks running.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Create a channel over the transport described by the configuration
    pub fn new(config: ChannelConfig, framing: Framing) -> Self {
        let transport = create_transport(&config.transport);
        Self::with_transport(config, framing, transport)
    }

    /// Create a channel over an already-constructed transport.
    ///
    /// This is the seam unit tests and custom transports use.
    pub fn with_transport(
        config: ChannelConfig,
        framing: Framing,
        transport: Box<dyn RawTransport>,
    ) -> Self {
        let (events, _) = event_channel();
        let unsolicited = config.process_unsolicited;
        Self {
            inner: Arc::new(ChannelInner {
                id: Uuid::new_v4(),
                config,
                framing,
                transport: AsyncMutex::new(transport),
                events,
                send_gate: AsyncMutex::new(()),
                correlator: Correlator::new(),
                burst: parking_lot::Mutex::new(ErrorBurst::default()),
                handler: parking_lot::RwLock::new(None),
                open: AtomicBool::new(false),
                unsolicited: AtomicBool::new(unsolicited),
                tasks: parking_lot::Mutex::new(ChannelTasks {
                    rx: None,
                    poll: None,
                }),
            }),
        }
    }

    /// Attach the protocol handler. Must happen before `open` for the
    /// post-open `init` hook to run.
    pub fn set_handler(&self, handler: Arc<dyn FrameHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    /// Unique channel id
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Channel name (event source tag)
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Channel configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Whether the channel is open
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Subscribe to the channel event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    /// Enable or disable handler processing of unsolicited frames
    pub fn set_unsolicited_enabled(&self, enabled: bool) {
        self.inner.unsolicited.store(enabled, Ordering::SeqCst);
    }

    /// Whether unsolicited frames are handed to the protocol handler
    pub fn unsolicited_enabled(&self) -> bool {
        self.inner.unsolicited.load(Ordering::SeqCst)
    }

    /// Emit an event on this channel's stream
    pub fn emit(&self, kind: EventKind, message: impl Into<String>) {
        let _ = self
            .inner
            .events
            .send(ChannelEvent::new(self.name(), kind, message));
    }

    /// Record one transient error against the burst monitor; emits an
    /// `Inspection` event when errors cluster inside the window.
    pub fn record_error(&self) {
        let burst = self.inner.burst.lock().record();
        if burst {
            self.emit(
                EventKind::Inspection,
                "repeated communication errors, inspection required",
            );
        }
    }

    /// Transport description (port/peer), for display
    pub async fn peer_info(&self) -> String {
        self.inner.transport.lock().await.peer_info()
    }

    /// Open the channel: connect the transport, start the receive task,
    /// run the handler's post-open setup, optionally start background
    /// polling, and emit `Connected`. Opening an open channel is a no-op.
    pub async fn open(&self) -> Result<(), TransportError> {
        if self.is_open() {
            return Ok(());
        }

        let (inbound, peer) = {
            let mut transport = self.inner.transport.lock().await;
            let peer = transport.peer_info();
            if let Err(e) = transport.open().await {
                self.emit(
                    EventKind::ConnectionError,
                    format!("open failed ({peer}): {e}"),
                );
                return Err(e);
            }
            let inbound = transport.take_inbound().ok_or_else(|| {
                TransportError::ConnectionFailed("inbound stream unavailable".into())
            })?;
            (inbound, peer)
        };

        self.inner.open.store(true, Ordering::SeqCst);

        let link = self.clone();
        let rx = tokio::spawn(async move { link.receive_loop(inbound).await });
        self.inner.tasks.lock().rx = Some(rx);

        let handler = self.inner.handler.read().clone();
        if let Some(handler) = &handler {
            handler.init(self).await;
        }

        if self.inner.config.background_poll {
            self.start_polling();
        }

        self.emit(EventKind::Connected, format!("open {peer}"));
        Ok(())
    }

    /// Close the channel: stop polling, disconnect the transport, emit
    /// `Disconnected`. Safe to call repeatedly or on a never-opened
    /// channel.
    ///
    /// In-flight exchanges are not cancelled; their own timeouts unblock
    /// them after the close.
    pub async fn close(&self) {
        self.stop_polling();
        let was_open = self.inner.open.swap(false, Ordering::SeqCst);

        {
            let mut transport = self.inner.transport.lock().await;
            let _ = transport.close().await;
        }

        if let Some(rx) = self.inner.tasks.lock().rx.take() {
            // the receive task normally ends once the transport drops its
            // inbound sender; abort covers transports that keep it alive
            rx.abort();
        }

        if was_open {
            self.emit(EventKind::Disconnected, "closed");
        }
    }

    /// Start the background poll task if it is not already running
    pub fn start_polling(&self) {
        let mut tasks = self.inner.tasks.lock();
        if tasks.poll.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let link = self.clone();
        let interval = Duration::from_millis(self.inner.config.poll_interval_ms.max(1));
        tasks.poll = Some(tokio::spawn(async move {
            loop {
                if !link.is_open() {
                    break;
                }
                let started = tokio::time::Instant::now();
                let handler = link.inner.handler.read().clone();
                if let Some(handler) = handler {
                    handler.poll(&link).await;
                }
                // keep the cycle period fixed; an overrunning poll starts
                // the next cycle immediately
                if let Some(rest) = interval.checked_sub(started.elapsed()) {
                    tokio::time::sleep(rest).await;
                }
            }
            debug!(channel = %link.name(), "poll task stopped");
        }));
    }

    /// Stop the background poll task. Idempotent; safe when never started.
    pub fn stop_polling(&self) {
        if let Some(task) = self.inner.tasks.lock().poll.take() {
            task.abort();
        }
    }

    /// Send raw bytes, serialized against every other send and exchange
    /// on this channel. Emits a `Tx` event on success, `TxError` and the
    /// error on failure. The gate is released on every exit path.
    pub async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let _gate = self.inner.send_gate.lock().await;

        match self.write_raw(data).await {
            Ok(()) => {
                self.emit(EventKind::Tx, render_payload(trim_line_ending(data)));
                Ok(())
            }
            Err(e) => {
                self.emit(EventKind::TxError, format!("write failed: {e}"));
                Err(e)
            }
        }
    }

    /// Send a request and await the frame the matcher claims.
    ///
    /// The whole operation runs inside the send gate, so concurrent
    /// exchanges never interleave on the wire. Returns `Ok(None)` when no
    /// matching frame arrives within `timeout_ms` — a timeout is a result,
    /// not an error. The pending registration is purged on every exit
    /// path; a write failure is reported as `TxError` and propagated.
    ///
    /// The physical write is not cancelled by the timeout: only the wait
    /// expires.
    pub async fn exchange<F>(
        &self,
        data: &[u8],
        matcher: F,
        timeout_ms: u64,
    ) -> Result<Option<Vec<u8>>, TransportError>
    where
        F: Fn(&[u8]) -> bool + Send + 'static,
    {
        let _gate = self.inner.send_gate.lock().await;
        let (id, slot) = self.inner.correlator.register(matcher);

        self.emit(
            EventKind::Tx,
            format!("[Sync] {}", render_payload(trim_line_ending(data))),
        );

        if let Err(e) = self.write_raw(data).await {
            self.inner.correlator.purge(id);
            self.emit(EventKind::TxError, format!("write failed: {e}"));
            return Err(e);
        }

        let reply = match tokio::time::timeout(Duration::from_millis(timeout_ms), slot).await {
            Ok(Ok(frame)) => Some(frame),
            // the correlator dropped the slot (channel torn down mid-wait)
            Ok(Err(_)) => None,
            // timer won the race
            Err(_) => None,
        };

        self.inner.correlator.purge(id);
        Ok(reply)
    }

    /// Number of registrations currently pending on the correlator
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.len()
    }

    async fn write_raw(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut transport = self.inner.transport.lock().await;
        if !transport.is_open() {
            return Err(TransportError::NotConnected);
        }
        transport.write(data).await
    }

    /// Single consumer of the transport's inbound chunk stream. Runs
    /// until the stream closes; reassembles frames and routes each one.
    async fn receive_loop(self, mut inbound: mpsc::Receiver<Bytes>) {
        let mut splitter = FrameSplitter::new(self.inner.framing.clone());

        while let Some(chunk) = inbound.recv().await {
            for frame in splitter.feed(&chunk) {
                self.dispatch_frame(&frame);
            }
        }

        // inbound stream ended without close(): the connection died
        if self.inner.open.swap(false, Ordering::SeqCst) {
            self.stop_polling();
            self.emit(EventKind::Disconnected, "connection lost");
        }
    }

    /// Offer a frame to the correlator first; unmatched frames go to the
    /// protocol handler's unsolicited path.
    fn dispatch_frame(&self, frame: &[u8]) {
        let consumed = self.inner.correlator.dispatch(frame);

        let tag = if consumed { "[Sync] " } else { "" };
        self.emit(EventKind::Rx, format!("{tag}{}", render_payload(frame)));

        if !consumed {
            if let Some(handler) = self.inner.handler.read().clone() {
                handler.on_frame(self, frame);
            }
        }
    }
}

/// Render a payload for event messages: ASCII text when printable,
/// hex otherwise.
pub(crate) fn render_payload(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) if !s.chars().any(|c| c.is_control() && c != '\t') => s.to_string(),
        _ => hex::encode(data),
    }
}

/// Strip trailing CR/LF bytes for log readability
pub(crate) fn trim_line_ending(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && (data[end - 1] == b'\r' || data[end - 1] == b'\n') {
        end -= 1;
    }
    &data[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_payload_ascii() {
        assert_eq!(render_payload(b"PWR?"), "PWR?");
    }

    #[test]
    fn test_render_payload_binary_falls_back_to_hex() {
        assert_eq!(render_payload(&[0x01, 0x03, 0xFF]), "0103ff");
    }

    #[test]
    fn test_trim_line_ending() {
        assert_eq!(trim_line_ending(b"CMD\r\n"), b"CMD");
        assert_eq!(trim_line_ending(b"CMD\r"), b"CMD");
        assert_eq!(trim_line_ending(b"CMD"), b"CMD");
        assert_eq!(trim_line_ending(b"\r\n"), b"");
    }

    #[test]
    fn test_config_defaults() {
        let cfg = ChannelConfig::new(
            "test",
            TransportConfig::Tcp(crate::core::transport::TcpConfig::new("localhost", 502)),
        );
        assert!(!cfg.background_poll);
        assert!(cfg.process_unsolicited);
        assert_eq!(cfg.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }
}
