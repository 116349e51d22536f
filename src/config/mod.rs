//! Application configuration
//!
//! TOML channel definitions consumed by the CLI: each entry names a
//! channel, its transport, the protocol driver to attach, and optional
//! frame delimiters for raw channels.

use crate::core::channel::ChannelConfig;
use crate::core::framing::Framing;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading failure
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    /// File is not valid TOML for this schema
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Protocol driver attached to a configured channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelDriver {
    /// No protocol handler; frames are only logged
    #[default]
    Raw,
    /// RF generator ASCII protocol
    RfGenerator,
    /// Modbus ASCII framing
    ModbusAscii,
}

/// One configured channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Protocol driver to attach
    #[serde(default)]
    pub driver: ChannelDriver,
    /// Channel and transport settings
    #[serde(flatten)]
    pub channel: ChannelConfig,
    /// Start-of-frame sequence for raw channels (escapes allowed)
    #[serde(default)]
    pub start_sequence: Option<String>,
    /// End-of-frame sequence for raw channels (escapes allowed)
    #[serde(default)]
    pub end_sequence: Option<String>,
}

impl ChannelEntry {
    /// Frame delimiters for a raw channel, decoded from the configured
    /// escape strings. Protocol drivers supply their own framing instead.
    pub fn framing(&self) -> Framing {
        Framing {
            start: self.start_sequence.as_deref().map(parse_escapes),
            end: self.end_sequence.as_deref().map(parse_escapes),
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Channels to open
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Decode a delimiter string with escape sequences into raw bytes.
/// Handles: \xNN (hex), \n, \r, \t, \\, \0, and literal characters.
pub fn parse_escapes(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'x' | b'X' if i + 3 < bytes.len() => {
                    if let Ok(hex_str) = std::str::from_utf8(&bytes[i + 2..i + 4]) {
                        if let Ok(value) = u8::from_str_radix(hex_str, 16) {
                            result.push(value);
                            i += 4;
                            continue;
                        }
                    }
                    // invalid hex escape, keep the backslash literally
                    result.push(bytes[i]);
                    i += 1;
                }
                b'n' => {
                    result.push(b'\n');
                    i += 2;
                }
                b'r' => {
                    result.push(b'\r');
                    i += 2;
                }
                b't' => {
                    result.push(b'\t');
                    i += 2;
                }
                b'\\' => {
                    result.push(b'\\');
                    i += 2;
                }
                b'0' => {
                    result.push(0);
                    i += 2;
                }
                _ => {
                    result.push(bytes[i]);
                    i += 1;
                }
            }
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }

    result
}
