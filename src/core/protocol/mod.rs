//! Protocol implementations
//!
//! Parsers, encoders, and drivers for the industrial protocols spoken
//! over a channel:
//! - Checksum algorithms (CRC-16/Modbus, LRC, CRC-32)
//! - Modbus RTU/ASCII codec, master contract, typed-call wrapper
//! - RF generator ASCII command protocol

pub mod checksum;
pub mod modbus;
pub mod rf_generator;

pub use modbus::{
    ascii_framing, AsciiMaster, ExceptionCode, FunctionCode, ModbusChannel, ModbusFault,
    ModbusFrame, ModbusMaster,
};
pub use rf_generator::{ControlMode, RfGenerator, RfGeneratorStatus};
