//! # Plasmalink
//!
//! An industrial equipment communication library:
//! - Serial and TCP channels with configurable start/end frame delimiters
//! - Request/response exchanges correlated against unsolicited traffic
//! - Strictly serialized writes per channel
//! - Background status polling
//! - Error-burst escalation to operator-facing inspection signals
//! - Modbus (RTU/ASCII codec, typed-call master wrapper)
//! - RF generator ASCII protocol driver
//!
//! ## Example
//!
//! ```rust,no_run
//! use plasmalink::{Channel, ChannelConfig, Framing, TransportConfig, TcpConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ChannelConfig::new(
//!         "plc",
//!         TransportConfig::Tcp(TcpConfig::new("192.168.0.10", 4000)),
//!     );
//!     let channel = Channel::new(config, Framing::end_delimited(b"\r\n"));
//!
//!     let mut events = channel.subscribe();
//!     channel.open().await?;
//!
//!     // fire-and-forget send
//!     channel.send(b"RST\r\n").await?;
//!
//!     // request/response with a 500 ms timeout
//!     let reply = channel
//!         .exchange(b"VER?\r\n", |f| f.starts_with(b"VER"), 500)
//!         .await?;
//!     println!("version: {reply:?}");
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{event}");
//!     }
//!
//!     channel.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{AppConfig, ChannelDriver, ChannelEntry, ConfigError};
pub use crate::core::burst::ErrorBurst;
pub use crate::core::channel::{Channel, ChannelConfig, FrameHandler};
pub use crate::core::correlator::Correlator;
pub use crate::core::event::{ChannelEvent, EventKind};
pub use crate::core::framing::{FrameSplitter, Framing, MAX_BUFFER_SIZE};
pub use crate::core::manager::{ChannelManager, CommandError, CommandRegistry, CommandResult};
pub use crate::core::protocol::{
    ascii_framing, AsciiMaster, ControlMode, ExceptionCode, FunctionCode, ModbusChannel,
    ModbusFault, ModbusMaster, RfGenerator, RfGeneratorStatus,
};
pub use crate::core::transport::{
    create_transport, list_ports, RawTransport, SerialConfig, SerialParity, SerialTransport,
    TcpConfig, TcpTransport, TransportConfig, TransportError, TransportKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
