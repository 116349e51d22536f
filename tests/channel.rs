//! Channel behavior over a scripted mock transport: write serialization,
//! exchange correlation and timeouts, unsolicited routing, burst
//! escalation, and the Modbus typed-call seam.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use plasmalink::core::protocol::modbus::{decode_ascii_body, encode_ascii_frame};
use plasmalink::{
    ascii_framing, AsciiMaster, Channel, ChannelConfig, ChannelEvent, CommandError,
    CommandRegistry, EventKind, ExceptionCode, FrameHandler, Framing, ModbusChannel, ModbusFault,
    ModbusMaster, RawTransport, RfGenerator, TcpConfig, TransportConfig, TransportError,
    TransportKind,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Test-side handle to a [`MockTransport`]: inject inbound bytes, inspect
/// writes, script replies, and fault the link.
#[derive(Clone, Default)]
struct MockHandle {
    log: Arc<Mutex<Vec<String>>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    feeder: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
    fail_writes: Arc<AtomicBool>,
    write_delay_ms: Arc<AtomicU64>,
    responder: Arc<Mutex<Option<Responder>>>,
}

impl MockHandle {
    async fn inject(&self, data: &[u8]) {
        let tx = self.feeder.lock().clone();
        if let Some(tx) = tx {
            tx.send(Bytes::copy_from_slice(data)).await.ok();
        }
    }

    /// Simulate the peer dropping the connection
    fn kill_link(&self) {
        *self.feeder.lock() = None;
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn set_responder(&self, f: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static) {
        *self.responder.lock() = Some(Box::new(f));
    }
}

struct MockTransport {
    handle: MockHandle,
    inbound: Option<mpsc::Receiver<Bytes>>,
    open: bool,
}

#[async_trait]
impl RawTransport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::channel(64);
        *self.handle.feeder.lock() = Some(tx);
        self.inbound = Some(rx);
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.handle.kill_link();
        self.inbound = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.handle.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        let tag = String::from_utf8_lossy(data).trim().to_string();
        self.handle.log.lock().push(format!("begin {tag}"));

        let delay = self.handle.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.handle.writes.lock().push(data.to_vec());
        self.handle.log.lock().push(format!("end {tag}"));

        let reply = {
            let responder = self.handle.responder.lock();
            responder.as_ref().and_then(|f| f(data))
        };
        if let Some(reply) = reply {
            let tx = self.handle.feeder.lock().clone();
            if let Some(tx) = tx {
                tx.send(Bytes::from(reply)).await.ok();
            }
        }

        Ok(())
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.inbound.take()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn peer_info(&self) -> String {
        "mock".to_string()
    }
}

fn mock_channel_framed(name: &str, framing: Framing) -> (Channel, MockHandle) {
    let handle = MockHandle::default();
    let transport = MockTransport {
        handle: handle.clone(),
        inbound: None,
        open: false,
    };
    let config = ChannelConfig::new(name, TransportConfig::Tcp(TcpConfig::new("mock", 0)));
    let channel = Channel::with_transport(config, framing, Box::new(transport));
    (channel, handle)
}

fn mock_channel(name: &str) -> (Channel, MockHandle) {
    mock_channel_framed(name, Framing::end_delimited(b"\r\n"))
}

/// Drain currently queued events without blocking
fn drain(events: &mut broadcast::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        out.push(ev);
    }
    out
}

/// Wait until an event of the given kind arrives
async fn wait_for(events: &mut broadcast::Receiver<ChannelEvent>, kind: EventKind) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let ev = events.recv().await.expect("event stream closed");
            if ev.kind == kind {
                return ev;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind:?} event within 2s"))
}

#[tokio::test]
async fn concurrent_sends_never_interleave_on_the_wire() {
    let (channel, handle) = mock_channel("gate");
    handle.write_delay_ms.store(20, Ordering::SeqCst);
    channel.open().await.unwrap();

    let a = {
        let ch = channel.clone();
        tokio::spawn(async move { ch.send(b"AAAA\r\n").await })
    };
    let b = {
        let ch = channel.clone();
        tokio::spawn(async move { ch.send(b"BBBB\r\n").await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // every write must fully complete before the next one begins
    let log = handle.log();
    assert_eq!(log.len(), 4);
    for pair in log.chunks(2) {
        assert_eq!(pair[0].replacen("begin", "end", 1), pair[1]);
    }

    channel.close().await;
}

#[tokio::test]
async fn exchange_timeout_returns_none_and_leaves_no_pending() {
    let (channel, _handle) = mock_channel("timeout");
    channel.open().await.unwrap();

    let reply = channel
        .exchange(b"PING\r\n", |f| f == b"PONG", 50)
        .await
        .unwrap();

    assert_eq!(reply, None);
    assert_eq!(channel.pending_requests(), 0);

    channel.close().await;
}

#[tokio::test]
async fn exchange_resolves_with_matching_frame() {
    let (channel, handle) = mock_channel("pair");
    handle.set_responder(|req| match req {
        b"A?\r\n" => Some(b"A!\r\n".to_vec()),
        b"B?\r\n" => Some(b"B!\r\n".to_vec()),
        _ => None,
    });
    channel.open().await.unwrap();

    let t1 = {
        let ch = channel.clone();
        tokio::spawn(async move { ch.exchange(b"A?\r\n", |f| f == b"A!", 1000).await })
    };
    let t2 = {
        let ch = channel.clone();
        tokio::spawn(async move { ch.exchange(b"B?\r\n", |f| f == b"B!", 1000).await })
    };

    assert_eq!(t1.await.unwrap().unwrap(), Some(b"A!".to_vec()));
    assert_eq!(t2.await.unwrap().unwrap(), Some(b"B!".to_vec()));
    assert_eq!(channel.pending_requests(), 0);

    channel.close().await;
}

#[tokio::test]
async fn exchange_write_failure_cleans_up_and_propagates() {
    let (channel, handle) = mock_channel("txfail");
    channel.open().await.unwrap();
    handle.fail_writes.store(true, Ordering::SeqCst);

    let mut events = channel.subscribe();
    let result = channel.exchange(b"X?\r\n", |_| true, 100).await;

    assert!(result.is_err());
    assert_eq!(channel.pending_requests(), 0);
    wait_for(&mut events, EventKind::TxError).await;

    channel.close().await;
}

struct RecordingHandler {
    frames: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl FrameHandler for RecordingHandler {
    fn on_frame(&self, _link: &Channel, frame: &[u8]) {
        self.frames.lock().push(frame.to_vec());
    }
}

#[tokio::test]
async fn matched_frames_bypass_the_unsolicited_hook() {
    let (channel, handle) = mock_channel("routing");
    let recorder = Arc::new(RecordingHandler {
        frames: Mutex::new(Vec::new()),
    });
    channel.set_handler(recorder.clone());
    channel.open().await.unwrap();

    let mut events = channel.subscribe();

    // unsolicited traffic goes to the handler
    handle.inject(b"STATUS 1\r\n").await;
    wait_for(&mut events, EventKind::Rx).await;

    // a claimed reply does not
    let exchange = {
        let ch = channel.clone();
        tokio::spawn(async move { ch.exchange(b"Q?\r\n", |f| f == b"R!", 1000).await })
    };
    // give the exchange time to register before answering
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.inject(b"R!\r\n").await;

    assert_eq!(exchange.await.unwrap().unwrap(), Some(b"R!".to_vec()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(recorder.frames.lock().clone(), vec![b"STATUS 1".to_vec()]);

    channel.close().await;
}

#[tokio::test]
async fn sync_exchanges_are_tagged_in_tx_events() {
    let (channel, handle) = mock_channel("tags");
    handle.set_responder(|req| (req == b"REQ\r\n").then(|| b"OK\r\n".to_vec()));
    channel.open().await.unwrap();

    let mut events = channel.subscribe();

    channel.send(b"CMD\r\n").await.unwrap();
    let tx = wait_for(&mut events, EventKind::Tx).await;
    assert_eq!(tx.message, "CMD");

    channel
        .exchange(b"REQ\r\n", |f| f == b"OK", 500)
        .await
        .unwrap();
    let tx = wait_for(&mut events, EventKind::Tx).await;
    assert_eq!(tx.message, "[Sync] REQ");
    let rx = wait_for(&mut events, EventKind::Rx).await;
    assert_eq!(rx.message, "[Sync] OK");

    channel.close().await;
}

#[tokio::test]
async fn error_burst_emits_exactly_one_inspection() {
    let (channel, _handle) = mock_channel("burst");
    channel.open().await.unwrap();
    let mut events = channel.subscribe();

    channel.record_error();
    channel.record_error();
    channel.record_error();

    let inspections = drain(&mut events)
        .into_iter()
        .filter(|e| e.kind == EventKind::Inspection)
        .count();
    assert_eq!(inspections, 1);

    channel.close().await;
}

#[tokio::test]
async fn lost_connection_is_reported_and_closes_the_channel() {
    let (channel, handle) = mock_channel("lost");
    channel.open().await.unwrap();
    let mut events = channel.subscribe();

    handle.kill_link();
    wait_for(&mut events, EventKind::Disconnected).await;
    assert!(!channel.is_open());
}

#[tokio::test]
async fn close_is_idempotent() {
    let (channel, _handle) = mock_channel("close");
    channel.open().await.unwrap();
    let mut events = channel.subscribe();

    channel.close().await;
    channel.close().await;

    let disconnects = drain(&mut events)
        .into_iter()
        .filter(|e| e.kind == EventKind::Disconnected)
        .count();
    assert_eq!(disconnects, 1);
}

// ---- Modbus typed-call wrapper ----

struct ScriptedMaster;

#[async_trait]
impl ModbusMaster for ScriptedMaster {
    async fn read_coils(&self, _a: u16, _c: u16, _s: u8) -> Result<Vec<bool>, ModbusFault> {
        Ok(vec![true, false, true])
    }
    async fn read_discrete_inputs(&self, _a: u16, _c: u16, _s: u8) -> Result<Vec<bool>, ModbusFault> {
        Err(ModbusFault::Io("wire cut".into()))
    }
    async fn read_holding_registers(&self, _a: u16, _c: u16, _s: u8) -> Result<Vec<u16>, ModbusFault> {
        Err(ModbusFault::Timeout)
    }
    async fn read_input_registers(&self, _a: u16, _c: u16, _s: u8) -> Result<Vec<u16>, ModbusFault> {
        Err(ModbusFault::Slave(ExceptionCode::IllegalDataAddress))
    }
    async fn write_single_coil(&self, _a: u16, _v: bool, _s: u8) -> Result<(), ModbusFault> {
        Ok(())
    }
    async fn write_multiple_coils(&self, _a: u16, _v: &[bool], _s: u8) -> Result<(), ModbusFault> {
        Ok(())
    }
    async fn write_single_register(&self, _a: u16, _v: u16, _s: u8) -> Result<(), ModbusFault> {
        Ok(())
    }
    async fn write_multiple_registers(&self, _a: u16, _v: &[u16], _s: u8) -> Result<(), ModbusFault> {
        Ok(())
    }
}

#[tokio::test]
async fn typed_wrapper_classifies_faults_and_returns_sentinels() {
    let (link, _handle) = mock_channel("modbus");
    let modbus = ModbusChannel::new(link, Box::new(|_| Arc::new(ScriptedMaster)));
    modbus.open().await.unwrap();

    let mut events = modbus.link().subscribe();

    // success: value + rendered Success event
    let coils = modbus.read_coils(0, 3, 1).await;
    assert_eq!(coils, vec![true, false, true]);
    let ev = wait_for(&mut events, EventKind::Success).await;
    assert_eq!(ev.message, "Op=ReadCoils S=1, Addr=0, Len=3, Result=1,0,1");

    // timeout: empty sentinel + Timeout event
    assert!(modbus.read_holding_registers(0, 2, 1).await.is_empty());
    wait_for(&mut events, EventKind::Timeout).await;

    // slave exception
    assert!(modbus.read_input_registers(0, 2, 1).await.is_empty());
    let ev = wait_for(&mut events, EventKind::SlaveException).await;
    assert!(ev.message.contains("Illegal Data Address"));

    // I/O fault
    assert!(modbus.read_inputs(0, 2, 1).await.is_empty());
    wait_for(&mut events, EventKind::IoException).await;

    // write success renders without data
    assert!(modbus.write_single_register(10, 99, 1).await);
    let ev = wait_for(&mut events, EventKind::Success).await;
    assert_eq!(ev.message, "Op=WriteSingleReg S=1, Addr=10, Value=99, Result=Ok");

    modbus.close().await;

    // calls against a closed channel: sentinel + UnexpectedException
    let mut events = modbus.link().subscribe();
    assert!(modbus.read_coils(0, 1, 1).await.is_empty());
    let ev = wait_for(&mut events, EventKind::UnexpectedException).await;
    assert!(ev.message.contains("closed"));
}

// ---- Modbus ASCII master over the exchange engine ----

#[tokio::test]
async fn ascii_master_reads_registers_end_to_end() {
    let (channel, handle) = mock_channel_framed("plc", ascii_framing());
    handle.set_responder(|req| {
        // request arrives as a full ASCII frame ":..hex..\r\n"
        let body = &req[1..req.len() - 2];
        let raw = decode_ascii_body(body).expect("request frame invalid");
        assert_eq!(raw[1], 0x03);
        // two registers: 100, 300
        let pdu = vec![0x03, 0x04, 0x00, 0x64, 0x01, 0x2C];
        Some(encode_ascii_frame(raw[0], &pdu))
    });
    channel.open().await.unwrap();

    let master = AsciiMaster::new(channel.clone(), 500);
    let regs = master.read_holding_registers(0, 2, 1).await.unwrap();
    assert_eq!(regs, vec![100, 300]);

    channel.close().await;
}

#[tokio::test]
async fn ascii_master_surfaces_slave_exceptions() {
    let (channel, handle) = mock_channel_framed("plc", ascii_framing());
    handle.set_responder(|req| {
        let body = &req[1..req.len() - 2];
        let raw = decode_ascii_body(body).unwrap();
        Some(encode_ascii_frame(raw[0], &[raw[1] | 0x80, 0x02]))
    });
    channel.open().await.unwrap();

    let master = AsciiMaster::new(channel.clone(), 500);
    match master.read_holding_registers(0, 1, 1).await {
        Err(ModbusFault::Slave(code)) => assert_eq!(code, ExceptionCode::IllegalDataAddress),
        other => panic!("expected slave exception, got {other:?}"),
    }

    channel.close().await;
}

#[tokio::test]
async fn ascii_master_times_out_without_reply() {
    let (channel, _handle) = mock_channel_framed("plc", ascii_framing());
    channel.open().await.unwrap();

    let master = AsciiMaster::new(channel.clone(), 50);
    assert!(matches!(
        master.read_coils(0, 1, 1).await,
        Err(ModbusFault::Timeout)
    ));
    assert_eq!(channel.pending_requests(), 0);

    channel.close().await;
}

// ---- RF generator driver ----

fn rf_channel() -> (Channel, Arc<RfGenerator>, MockHandle) {
    let (channel, handle) = mock_channel_framed("rf1", RfGenerator::framing());
    let rf = Arc::new(RfGenerator::new());
    channel.set_handler(rf.clone());
    (channel, rf, handle)
}

#[tokio::test]
async fn rf_query_skips_the_command_echo() {
    let (channel, rf, handle) = rf_channel();
    handle.set_responder(|req| match req {
        // the generator echoes the command, then answers
        b"?ro\r" => Some(b"?ro\rRON\r".to_vec()),
        b"?fw\r" => Some(b"?fw\rFW0250\r".to_vec()),
        _ => None,
    });
    channel.open().await.unwrap();

    assert!(rf.query_rf_state(&channel).await);
    assert_eq!(rf.query_forward_power(&channel).await, 250);

    let status = rf.status();
    assert!(status.rf_on);
    assert_eq!(status.forward_w, 250);

    channel.close().await;
}

#[tokio::test]
async fn rf_control_command_succeeds_on_echo() {
    let (channel, rf, handle) = rf_channel();
    handle.set_responder(|req| match req {
        b"trg\r" => Some(b"trg\r".to_vec()),
        _ => None,
    });
    channel.open().await.unwrap();

    assert!(rf.rf_on(&channel).await);
    // no echo -> failure
    assert!(!rf.rf_off(&channel).await);

    channel.close().await;
}

#[tokio::test]
async fn rf_unsolicited_frames_update_status() {
    let (channel, rf, handle) = rf_channel();
    channel.open().await.unwrap();
    let mut events = channel.subscribe();

    handle.inject(b"FW0100\rSF3\r").await;
    wait_for(&mut events, EventKind::Command).await;
    wait_for(&mut events, EventKind::Command).await;

    let status = rf.status();
    assert_eq!(status.forward_w, 100);
    assert_eq!(status.fault_code, 3);

    channel.close().await;
}

#[tokio::test]
async fn rf_unknown_reply_is_counted_toward_inspection() {
    let (channel, _rf, handle) = rf_channel();
    channel.open().await.unwrap();
    let mut events = channel.subscribe();

    // three unknown frames in quick succession cross the burst threshold
    handle.inject(b"GARBAGE1\rGARBAGE2\rGARBAGE3\r").await;

    wait_for(&mut events, EventKind::Inspection).await;

    channel.close().await;
}

#[tokio::test]
async fn rf_setpoint_is_validated_locally() {
    let (channel, rf, handle) = rf_channel();
    channel.open().await.unwrap();
    let mut events = channel.subscribe();

    assert!(!rf.set_power(&channel, 1500).await);
    let ev = wait_for(&mut events, EventKind::CommandError).await;
    assert!(ev.message.contains("out of range"));
    // nothing was written to the wire
    assert!(handle.writes().is_empty());

    channel.close().await;
}

#[tokio::test]
async fn rf_operations_dispatch_through_the_command_registry() {
    let (channel, rf, handle) = rf_channel();
    handle.set_responder(|req| match req {
        b"trg\r" => Some(b"trg\r".to_vec()),
        b"?sf\r" => Some(b"?sf\rSF7\r".to_vec()),
        _ => None,
    });
    channel.open().await.unwrap();

    let mut registry = CommandRegistry::new();
    RfGenerator::register_commands(&rf, &channel, &mut registry);
    assert!(registry.names().contains(&"rf1.set-power".to_string()));

    let reply = registry.invoke("rf1.rf-on", vec![]).await.unwrap();
    assert_eq!(reply, "RF on");

    let status = registry.invoke("rf1.status", vec![]).await.unwrap();
    assert!(status.contains("fault=7"));

    // device not answering: the failure reaches the caller
    match registry.invoke("rf1.rf-off", vec![]).await {
        Err(CommandError::Failed(_)) => {}
        other => panic!("expected Failed, got {other:?}"),
    }

    channel.close().await;
}

#[tokio::test]
async fn rf_background_frames_can_be_disabled() {
    let (channel, rf, handle) = rf_channel();
    channel.open().await.unwrap();
    let mut events = channel.subscribe();

    channel.set_unsolicited_enabled(false);
    handle.inject(b"FW0500\r").await;
    wait_for(&mut events, EventKind::Rx).await;
    assert_eq!(rf.status().forward_w, 0);

    channel.set_unsolicited_enabled(true);
    handle.inject(b"FW0500\r").await;
    wait_for(&mut events, EventKind::Command).await;
    assert_eq!(rf.status().forward_w, 500);

    channel.close().await;
}
