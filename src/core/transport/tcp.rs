//! TCP transport implementation

use super::{RawTransport, TransportError, TransportKind, INBOUND_QUEUE, READ_CHUNK};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// TCP connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connection timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl TcpConfig {
    /// Create a new TCP configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_secs: 10,
        }
    }

    /// Set connect timeout
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// TCP client transport
pub struct TcpTransport {
    config: TcpConfig,
    writer: Option<OwnedWriteHalf>,
    inbound: Option<mpsc::Receiver<Bytes>>,
    pump: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Create a new TCP transport (not yet connected)
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            writer: None,
            inbound: None,
            pump: None,
        }
    }
}

#[async_trait]
impl RawTransport for TcpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let stream = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.timeout_secs))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // Lower latency for small request/response payloads
        stream.set_nodelay(true)?;

        let (mut reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);

        let peer = addr.clone();
        let pump = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!(peer = %peer, "peer closed connection");
                        break;
                    }
                    Ok(n) => {
                        if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "tcp read failed");
                        break;
                    }
                }
            }
        });

        self.writer = Some(writer);
        self.inbound = Some(rx);
        self.pump = Some(pump);

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await.ok();
        }
        self.inbound = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.inbound.take()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn peer_info(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}
