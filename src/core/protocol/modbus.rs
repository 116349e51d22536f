//! Modbus protocol support
//!
//! RTU and ASCII frame codecs, the narrow [`ModbusMaster`] contract a
//! channel wraps, and [`ModbusChannel`] — the typed-call seam that turns
//! every read/write into classified events plus sentinel returns, so
//! equipment-control logic never sees a raised protocol fault.

use super::checksum;
use crate::core::channel::Channel;
use crate::core::event::EventKind;
use crate::core::framing::Framing;
use crate::core::transport::TransportError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Default reply timeout for master operations
pub const DEFAULT_MODBUS_TIMEOUT_MS: u64 = 1000;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Get function code from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(FunctionCode::ReadCoils),
            0x02 => Some(FunctionCode::ReadDiscreteInputs),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x05 => Some(FunctionCode::WriteSingleCoil),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x0F => Some(FunctionCode::WriteMultipleCoils),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Function not supported by the slave
    IllegalFunction = 0x01,
    /// Address out of range
    IllegalDataAddress = 0x02,
    /// Value not acceptable
    IllegalDataValue = 0x03,
    /// Unrecoverable slave failure
    SlaveDeviceFailure = 0x04,
    /// Long-running request accepted
    Acknowledge = 0x05,
    /// Slave busy, retry later
    SlaveDeviceBusy = 0x06,
    /// Extended-memory parity failure
    MemoryParityError = 0x08,
    /// Gateway misconfigured or overloaded
    GatewayPathUnavailable = 0x0A,
    /// Gateway target absent
    GatewayTargetFailedToRespond = 0x0B,
}

impl ExceptionCode {
    /// Get exception from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::SlaveDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::SlaveDeviceBusy),
            0x08 => Some(ExceptionCode::MemoryParityError),
            0x0A => Some(ExceptionCode::GatewayPathUnavailable),
            0x0B => Some(ExceptionCode::GatewayTargetFailedToRespond),
            _ => None,
        }
    }

    /// Get name of exception
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::SlaveDeviceFailure => "Slave Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::SlaveDeviceBusy => "Slave Device Busy",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetFailedToRespond => "Gateway Target Failed to Respond",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame codec error
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough bytes for a complete frame
    #[error("frame too short")]
    TooShort,
    /// ASCII body is not valid hex
    #[error("invalid hex encoding")]
    BadHex,
    /// LRC check failed
    #[error("LRC mismatch")]
    BadLrc,
    /// CRC check failed
    #[error("CRC mismatch")]
    BadCrc,
    /// Function code not recognized
    #[error("unknown function code {0:#04x}")]
    UnknownFunction(u8),
}

/// Parsed reply frame
#[derive(Debug, Clone)]
pub enum ModbusFrame {
    /// Normal response
    Response(ModbusResponse),
    /// Slave raised an exception
    Exception(ModbusException),
}

/// Modbus response
#[derive(Debug, Clone)]
pub struct ModbusResponse {
    /// Responding slave
    pub slave_id: u8,
    /// Function answered
    pub function: FunctionCode,
    /// Response data (byte-count prefix stripped for reads)
    pub data: Vec<u8>,
}

/// Modbus exception response
#[derive(Debug, Clone)]
pub struct ModbusException {
    /// Responding slave
    pub slave_id: u8,
    /// Function that failed (high bit cleared)
    pub function: u8,
    /// Exception raised
    pub exception: ExceptionCode,
}

// ============ RTU Encoding/Decoding ============

/// Build a Modbus RTU read request frame
pub fn build_rtu_request(
    slave_id: u8,
    function: FunctionCode,
    start_address: u16,
    quantity: u16,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave_id);
    frame.push(function as u8);
    frame.extend_from_slice(&start_address.to_be_bytes());
    frame.extend_from_slice(&quantity.to_be_bytes());

    let crc = checksum::crc16_modbus(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());

    frame
}

/// Build a Modbus RTU write-single-register request
pub fn build_rtu_write_single_register(slave_id: u8, address: u16, value: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave_id);
    frame.push(FunctionCode::WriteSingleRegister as u8);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&value.to_be_bytes());

    let crc = checksum::crc16_modbus(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());

    frame
}

/// Parse a Modbus RTU reply frame (CRC verified)
pub fn parse_rtu_frame(data: &[u8]) -> Result<ModbusFrame, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::TooShort);
    }

    let frame_len = data.len();
    let crc_received = u16::from_le_bytes([data[frame_len - 2], data[frame_len - 1]]);
    let crc_calculated = checksum::crc16_modbus(&data[..frame_len - 2]);
    if crc_received != crc_calculated {
        return Err(CodecError::BadCrc);
    }

    let slave_id = data[0];
    let function_code = data[1];

    // exception response: function with bit 7 set
    if function_code & 0x80 != 0 {
        if data.len() < 5 {
            return Err(CodecError::TooShort);
        }
        let exception =
            ExceptionCode::from_u8(data[2]).unwrap_or(ExceptionCode::SlaveDeviceFailure);
        return Ok(ModbusFrame::Exception(ModbusException {
            slave_id,
            function: function_code & 0x7F,
            exception,
        }));
    }

    let function =
        FunctionCode::from_u8(function_code).ok_or(CodecError::UnknownFunction(function_code))?;

    match function {
        FunctionCode::ReadCoils
        | FunctionCode::ReadDiscreteInputs
        | FunctionCode::ReadHoldingRegisters
        | FunctionCode::ReadInputRegisters => {
            if data.len() < 5 {
                return Err(CodecError::TooShort);
            }
            let byte_count = data[2] as usize;
            if data.len() < 3 + byte_count + 2 {
                return Err(CodecError::TooShort);
            }
            Ok(ModbusFrame::Response(ModbusResponse {
                slave_id,
                function,
                data: data[3..3 + byte_count].to_vec(),
            }))
        }
        _ => {
            // write echoes: address + value/quantity
            if data.len() < 8 {
                return Err(CodecError::TooShort);
            }
            Ok(ModbusFrame::Response(ModbusResponse {
                slave_id,
                function,
                data: data[2..6].to_vec(),
            }))
        }
    }
}

// ============ ASCII Encoding/Decoding ============

/// Frame delimiters for Modbus ASCII (':' ... CRLF), ready for a channel
pub fn ascii_framing() -> Framing {
    Framing::bracketed(b":", b"\r\n")
}

/// Encode slave id + PDU as a Modbus ASCII frame (':' + hex + LRC + CRLF)
pub fn encode_ascii_frame(slave_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(1 + pdu.len());
    raw.push(slave_id);
    raw.extend_from_slice(pdu);
    let lrc = checksum::lrc(&raw);

    let mut frame = Vec::with_capacity(raw.len() * 2 + 5);
    frame.push(b':');
    frame.extend_from_slice(hex::encode_upper(&raw).as_bytes());
    frame.extend_from_slice(hex::encode_upper([lrc]).as_bytes());
    frame.extend_from_slice(b"\r\n");
    frame
}

/// Decode the hex body of an ASCII frame (the bytes between ':' and
/// CRLF); verifies the trailing LRC and returns slave id + PDU.
pub fn decode_ascii_body(body: &[u8]) -> Result<Vec<u8>, CodecError> {
    if body.len() < 6 || body.len() % 2 != 0 {
        return Err(CodecError::TooShort);
    }
    let bytes = hex::decode(body).map_err(|_| CodecError::BadHex)?;
    let (raw, lrc_byte) = bytes.split_at(bytes.len() - 1);
    if checksum::lrc(raw) != lrc_byte[0] {
        return Err(CodecError::BadLrc);
    }
    Ok(raw.to_vec())
}

// ============ Data helpers ============

/// Extract big-endian register values from response data
pub fn parse_registers(data: &[u8]) -> Vec<u16> {
    data.chunks(2)
        .map(|chunk| {
            if chunk.len() == 2 {
                u16::from_be_bytes([chunk[0], chunk[1]])
            } else {
                0
            }
        })
        .collect()
}

/// Extract coil/discrete values from packed response data
pub fn parse_coils(data: &[u8], count: usize) -> Vec<bool> {
    let mut result = Vec::with_capacity(count);
    for (i, &byte) in data.iter().enumerate() {
        for bit in 0..8 {
            if i * 8 + bit >= count {
                break;
            }
            result.push((byte >> bit) & 1 == 1);
        }
    }
    result
}

/// Pack coil values into bytes
pub fn pack_coils(coils: &[bool]) -> Vec<u8> {
    let mut result = Vec::with_capacity(coils.len().div_ceil(8));
    for chunk in coils.chunks(8) {
        let mut byte = 0u8;
        for (bit, &coil) in chunk.iter().enumerate() {
            if coil {
                byte |= 1 << bit;
            }
        }
        result.push(byte);
    }
    result
}

// ============ Master contract & typed-call wrapper ============

/// Fault classification for master operations
#[derive(Error, Debug)]
pub enum ModbusFault {
    /// Slave answered with an exception response
    #[error("slave exception: {}", .0.name())]
    Slave(ExceptionCode),
    /// No reply inside the allotted time
    #[error("timed out waiting for reply")]
    Timeout,
    /// Transport-level failure
    #[error("I/O failure: {0}")]
    Io(String),
    /// Anything else (malformed reply, bad state)
    #[error("{0}")]
    Unexpected(String),
}

/// The protocol-master contract this core wraps. Masters are constructed
/// per open (transport-specific, out of this crate's scope except for
/// [`AsciiMaster`]) and dropped on close.
#[async_trait]
pub trait ModbusMaster: Send + Sync {
    /// Read coil states (function 0x01)
    async fn read_coils(&self, addr: u16, count: u16, slave: u8) -> Result<Vec<bool>, ModbusFault>;
    /// Read discrete inputs (function 0x02)
    async fn read_discrete_inputs(
        &self,
        addr: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<bool>, ModbusFault>;
    /// Read holding registers (function 0x03)
    async fn read_holding_registers(
        &self,
        addr: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>, ModbusFault>;
    /// Read input registers (function 0x04)
    async fn read_input_registers(
        &self,
        addr: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>, ModbusFault>;
    /// Write one coil (function 0x05)
    async fn write_single_coil(
        &self,
        addr: u16,
        value: bool,
        slave: u8,
    ) -> Result<(), ModbusFault>;
    /// Write multiple coils (function 0x0F)
    async fn write_multiple_coils(
        &self,
        addr: u16,
        values: &[bool],
        slave: u8,
    ) -> Result<(), ModbusFault>;
    /// Write one register (function 0x06)
    async fn write_single_register(
        &self,
        addr: u16,
        value: u16,
        slave: u8,
    ) -> Result<(), ModbusFault>;
    /// Write multiple registers (function 0x10)
    async fn write_multiple_registers(
        &self,
        addr: u16,
        values: &[u16],
        slave: u8,
    ) -> Result<(), ModbusFault>;
}

/// Render an operation result for `Success` events
pub trait RenderResult {
    /// Human-readable rendering ("1,0,1" for bits, decimals for registers)
    fn render(&self) -> String;
}

impl RenderResult for Vec<bool> {
    fn render(&self) -> String {
        self.iter()
            .map(|b| if *b { "1" } else { "0" })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl RenderResult for Vec<u16> {
    fn render(&self) -> String {
        self.iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl RenderResult for () {
    fn render(&self) -> String {
        "Ok".to_string()
    }
}

/// Builds a master over the freshly opened channel
pub type MasterFactory = Box<dyn Fn(&Channel) -> Arc<dyn ModbusMaster> + Send + Sync>;

/// A channel speaking Modbus through the typed-call wrapper.
///
/// Every operation classifies its outcome into a channel event
/// (`Success`, `SlaveException`, `Timeout`, `IoException`,
/// `UnexpectedException`) and returns a sentinel (empty vec, `false`)
/// instead of propagating a fault — the uniform error-reporting seam for
/// equipment-control logic.
pub struct ModbusChannel {
    link: Channel,
    master: RwLock<Option<Arc<dyn ModbusMaster>>>,
    factory: MasterFactory,
}

impl ModbusChannel {
    /// Wrap a channel; the factory runs once per successful open
    pub fn new(link: Channel, factory: MasterFactory) -> Self {
        Self {
            link,
            master: RwLock::new(None),
            factory,
        }
    }

    /// Wrap a channel with an in-crate ASCII master. The channel must use
    /// [`ascii_framing`].
    pub fn ascii(link: Channel, timeout_ms: u64) -> Self {
        Self::new(
            link,
            Box::new(move |ch| Arc::new(AsciiMaster::new(ch.clone(), timeout_ms))),
        )
    }

    /// The underlying channel (events, lifecycle state)
    pub fn link(&self) -> &Channel {
        &self.link
    }

    /// Open the transport, then construct the protocol master on top of it
    pub async fn open(&self) -> Result<(), TransportError> {
        self.link.open().await?;
        *self.master.write() = Some((self.factory)(&self.link));
        Ok(())
    }

    /// Drop the master, then close the transport
    pub async fn close(&self) {
        *self.master.write() = None;
        self.link.close().await;
    }

    fn master(&self) -> Option<Arc<dyn ModbusMaster>> {
        if !self.link.is_open() {
            return None;
        }
        self.master.read().clone()
    }

    /// Run one master call, classify the outcome, return `None` on any
    /// fault. `fut` is `None` when the channel is closed or the master is
    /// missing.
    async fn call<T, Fut>(&self, op: &str, fut: Option<Fut>) -> Option<T>
    where
        T: RenderResult,
        Fut: Future<Output = Result<T, ModbusFault>>,
    {
        let Some(fut) = fut else {
            self.link.emit(
                EventKind::UnexpectedException,
                format!("Op={op}, channel closed or master missing"),
            );
            return None;
        };

        match fut.await {
            Ok(value) => {
                self.link.emit(
                    EventKind::Success,
                    format!("Op={op}, Result={}", value.render()),
                );
                Some(value)
            }
            Err(ModbusFault::Slave(code)) => {
                self.link.emit(
                    EventKind::SlaveException,
                    format!("Op={op}, Msg={}", code.name()),
                );
                None
            }
            Err(ModbusFault::Timeout) => {
                self.link
                    .emit(EventKind::Timeout, format!("Op={op}, Msg=no reply"));
                None
            }
            Err(ModbusFault::Io(msg)) => {
                self.link
                    .emit(EventKind::IoException, format!("Op={op}, Msg={msg}"));
                None
            }
            Err(ModbusFault::Unexpected(msg)) => {
                self.link.emit(
                    EventKind::UnexpectedException,
                    format!("Op={op}, Msg={msg}"),
                );
                None
            }
        }
    }

    /// Read coils; empty on fault
    pub async fn read_coils(&self, addr: u16, count: u16, slave: u8) -> Vec<bool> {
        let op = format!("ReadCoils S={slave}, Addr={addr}, Len={count}");
        let m = self.master();
        self.call(&op, m.map(|m| async move { m.read_coils(addr, count, slave).await }))
            .await
            .unwrap_or_default()
    }

    /// Read discrete inputs; empty on fault
    pub async fn read_inputs(&self, addr: u16, count: u16, slave: u8) -> Vec<bool> {
        let op = format!("ReadInputs S={slave}, Addr={addr}, Len={count}");
        let m = self.master();
        self.call(
            &op,
            m.map(|m| async move { m.read_discrete_inputs(addr, count, slave).await }),
        )
        .await
        .unwrap_or_default()
    }

    /// Read holding registers; empty on fault
    pub async fn read_holding_registers(&self, addr: u16, count: u16, slave: u8) -> Vec<u16> {
        let op = format!("ReadHoldingRegs S={slave}, Addr={addr}, Len={count}");
        let m = self.master();
        self.call(
            &op,
            m.map(|m| async move { m.read_holding_registers(addr, count, slave).await }),
        )
        .await
        .unwrap_or_default()
    }

    /// Read input registers; empty on fault
    pub async fn read_input_registers(&self, addr: u16, count: u16, slave: u8) -> Vec<u16> {
        let op = format!("ReadInputRegs S={slave}, Addr={addr}, Len={count}");
        let m = self.master();
        self.call(
            &op,
            m.map(|m| async move { m.read_input_registers(addr, count, slave).await }),
        )
        .await
        .unwrap_or_default()
    }

    /// Write one coil; `false` on fault
    pub async fn write_single_coil(&self, addr: u16, value: bool, slave: u8) -> bool {
        let op = format!("WriteSingleCoil S={slave}, Addr={addr}, Value={value}");
        let m = self.master();
        self.call(
            &op,
            m.map(|m| async move { m.write_single_coil(addr, value, slave).await }),
        )
        .await
        .is_some()
    }

    /// Write multiple coils; `false` on fault
    pub async fn write_multiple_coils(&self, addr: u16, values: &[bool], slave: u8) -> bool {
        let op = format!("WriteMultipleCoils S={slave}, Addr={addr}, Len={}", values.len());
        let m = self.master();
        let values = values.to_vec();
        self.call(
            &op,
            m.map(|m| async move { m.write_multiple_coils(addr, &values, slave).await }),
        )
        .await
        .is_some()
    }

    /// Write one register; `false` on fault
    pub async fn write_single_register(&self, addr: u16, value: u16, slave: u8) -> bool {
        let op = format!("WriteSingleReg S={slave}, Addr={addr}, Value={value}");
        let m = self.master();
        self.call(
            &op,
            m.map(|m| async move { m.write_single_register(addr, value, slave).await }),
        )
        .await
        .is_some()
    }

    /// Write multiple registers; `false` on fault
    pub async fn write_multiple_registers(&self, addr: u16, values: &[u16], slave: u8) -> bool {
        let op = format!("WriteMultipleRegs S={slave}, Addr={addr}, Len={}", values.len());
        let m = self.master();
        let values = values.to_vec();
        self.call(
            &op,
            m.map(|m| async move { m.write_multiple_registers(addr, &values, slave).await }),
        )
        .await
        .is_some()
    }
}

// ============ ASCII master over a channel ============

/// Modbus ASCII master speaking through a channel's exchange engine.
///
/// The channel must be framed with [`ascii_framing`] so inbound frames
/// arrive as the hex body between ':' and CRLF.
pub struct AsciiMaster {
    link: Channel,
    timeout_ms: u64,
}

impl AsciiMaster {
    /// Create a master over the given channel
    pub fn new(link: Channel, timeout_ms: u64) -> Self {
        Self { link, timeout_ms }
    }

    /// Send one PDU and return the validated reply (slave id + PDU)
    async fn request(&self, slave: u8, pdu: Vec<u8>) -> Result<Vec<u8>, ModbusFault> {
        let function = pdu[0];
        let frame = encode_ascii_frame(slave, &pdu);

        let matcher = move |body: &[u8]| match decode_ascii_body(body) {
            Ok(raw) => raw.len() >= 2 && raw[0] == slave && raw[1] & 0x7F == function,
            Err(_) => false,
        };

        let reply = self
            .link
            .exchange(&frame, matcher, self.timeout_ms)
            .await
            .map_err(|e| ModbusFault::Io(e.to_string()))?
            .ok_or(ModbusFault::Timeout)?;

        let raw =
            decode_ascii_body(&reply).map_err(|e| ModbusFault::Unexpected(e.to_string()))?;
        if raw.len() < 2 {
            return Err(ModbusFault::Unexpected("short reply".into()));
        }

        if raw[1] & 0x80 != 0 {
            let code = raw
                .get(2)
                .and_then(|c| ExceptionCode::from_u8(*c))
                .unwrap_or(ExceptionCode::SlaveDeviceFailure);
            return Err(ModbusFault::Slave(code));
        }

        Ok(raw)
    }

    async fn read_bits(
        &self,
        function: FunctionCode,
        addr: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<bool>, ModbusFault> {
        let mut pdu = vec![function as u8];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&count.to_be_bytes());

        let raw = self.request(slave, pdu).await?;
        let byte_count = *raw.get(2).ok_or(ModbusFault::Unexpected("short reply".into()))? as usize;
        let data = raw
            .get(3..3 + byte_count)
            .ok_or(ModbusFault::Unexpected("truncated bit data".into()))?;
        Ok(parse_coils(data, count as usize))
    }

    async fn read_words(
        &self,
        function: FunctionCode,
        addr: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>, ModbusFault> {
        let mut pdu = vec![function as u8];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&count.to_be_bytes());

        let raw = self.request(slave, pdu).await?;
        let byte_count = *raw.get(2).ok_or(ModbusFault::Unexpected("short reply".into()))? as usize;
        let data = raw
            .get(3..3 + byte_count)
            .ok_or(ModbusFault::Unexpected("truncated register data".into()))?;
        Ok(parse_registers(data))
    }
}

#[async_trait]
impl ModbusMaster for AsciiMaster {
    async fn read_coils(&self, addr: u16, count: u16, slave: u8) -> Result<Vec<bool>, ModbusFault> {
        self.read_bits(FunctionCode::ReadCoils, addr, count, slave).await
    }

    async fn read_discrete_inputs(
        &self,
        addr: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<bool>, ModbusFault> {
        self.read_bits(FunctionCode::ReadDiscreteInputs, addr, count, slave)
            .await
    }

    async fn read_holding_registers(
        &self,
        addr: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>, ModbusFault> {
        self.read_words(FunctionCode::ReadHoldingRegisters, addr, count, slave)
            .await
    }

    async fn read_input_registers(
        &self,
        addr: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>, ModbusFault> {
        self.read_words(FunctionCode::ReadInputRegisters, addr, count, slave)
            .await
    }

    async fn write_single_coil(
        &self,
        addr: u16,
        value: bool,
        slave: u8,
    ) -> Result<(), ModbusFault> {
        let mut pdu = vec![FunctionCode::WriteSingleCoil as u8];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&if value { 0xFF00u16 } else { 0x0000 }.to_be_bytes());
        self.request(slave, pdu).await.map(|_| ())
    }

    async fn write_multiple_coils(
        &self,
        addr: u16,
        values: &[bool],
        slave: u8,
    ) -> Result<(), ModbusFault> {
        let packed = pack_coils(values);
        let mut pdu = vec![FunctionCode::WriteMultipleCoils as u8];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
        pdu.push(packed.len() as u8);
        pdu.extend_from_slice(&packed);
        self.request(slave, pdu).await.map(|_| ())
    }

    async fn write_single_register(
        &self,
        addr: u16,
        value: u16,
        slave: u8,
    ) -> Result<(), ModbusFault> {
        let mut pdu = vec![FunctionCode::WriteSingleRegister as u8];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&value.to_be_bytes());
        self.request(slave, pdu).await.map(|_| ())
    }

    async fn write_multiple_registers(
        &self,
        addr: u16,
        values: &[u16],
        slave: u8,
    ) -> Result<(), ModbusFault> {
        let mut pdu = vec![FunctionCode::WriteMultipleRegisters as u8];
        pdu.extend_from_slice(&addr.to_be_bytes());
        pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
        pdu.push((values.len() * 2) as u8);
        for value in values {
            pdu.extend_from_slice(&value.to_be_bytes());
        }
        self.request(slave, pdu).await.map(|_| ())
    }
}
