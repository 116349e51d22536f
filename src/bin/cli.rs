//! plasmalink-cli — open configured channels and stream their events
//!
//! Channels come from a TOML file (`--config`) or an ad-hoc flag
//! (`--serial` / `--tcp`). Every channel event is printed as text or
//! JSON lines until Ctrl-C, which closes all channels cleanly.

use anyhow::{bail, Context, Result};
use clap::Parser;
use plasmalink::{
    ascii_framing, AppConfig, Channel, ChannelConfig, ChannelDriver, ChannelEntry, ChannelManager,
    RfGenerator, SerialConfig, SerialParity, TcpConfig, TransportConfig,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "plasmalink-cli",
    version,
    about = "Channel monitor for industrial equipment links"
)]
struct Cli {
    /// TOML channel configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Open a single serial channel on this port (e.g. /dev/ttyUSB0)
    #[arg(long, conflicts_with = "config")]
    serial: Option<String>,

    /// Baud rate for --serial
    #[arg(long, default_value_t = 115200)]
    baud: u32,

    /// Parity for --serial (none, odd, even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Open a single TCP channel to host:port
    #[arg(long, conflicts_with_all = ["config", "serial"])]
    tcp: Option<String>,

    /// End-of-frame sequence for ad-hoc channels (escapes allowed)
    #[arg(long, default_value = r"\r\n")]
    end: String,

    /// Start-of-frame sequence for ad-hoc channels (escapes allowed)
    #[arg(long)]
    start: Option<String>,

    /// Attach the RF generator driver with background polling
    #[arg(long)]
    rf: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn entries_from_args(cli: &Cli) -> Result<Vec<ChannelEntry>> {
    if let Some(path) = &cli.config {
        let config = AppConfig::load(path).context("loading channel configuration")?;
        if config.channels.is_empty() {
            bail!("configuration defines no channels");
        }
        return Ok(config.channels);
    }

    let transport = if let Some(port) = &cli.serial {
        let parity: SerialParity = cli.parity.parse().unwrap_or_default();
        TransportConfig::Serial(SerialConfig::new(port, cli.baud).parity(parity))
    } else if let Some(endpoint) = &cli.tcp {
        let (host, port) = endpoint
            .rsplit_once(':')
            .context("--tcp expects host:port")?;
        TransportConfig::Tcp(TcpConfig::new(host, port.parse().context("invalid port")?))
    } else {
        bail!("nothing to open: pass --config, --serial, or --tcp");
    };

    let mut channel = ChannelConfig::new("adhoc", transport);
    channel.background_poll = cli.rf;

    Ok(vec![ChannelEntry {
        driver: if cli.rf {
            ChannelDriver::RfGenerator
        } else {
            ChannelDriver::Raw
        },
        channel,
        start_sequence: cli.start.clone(),
        end_sequence: Some(cli.end.clone()),
    }])
}

fn build_channel(entry: &ChannelEntry) -> Channel {
    match entry.driver {
        ChannelDriver::Raw => Channel::new(entry.channel.clone(), entry.framing()),
        ChannelDriver::RfGenerator => {
            let (channel, _handler) = RfGenerator::attach(entry.channel.clone());
            channel
        }
        ChannelDriver::ModbusAscii => Channel::new(entry.channel.clone(), ascii_framing()),
    }
}

fn spawn_printer(channel: &Channel, json: bool) {
    let mut events = channel.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if json {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{line}"),
                            Err(e) => warn!(error = %e, "cannot serialize event"),
                        }
                    } else {
                        println!("{event}");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event printer lagged, events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.list_ports {
        for port in plasmalink::list_ports().context("enumerating serial ports")? {
            println!("{}", port.port_name);
        }
        return Ok(());
    }

    let entries = entries_from_args(&cli)?;
    let mut manager = ChannelManager::new();
    for entry in &entries {
        let channel = build_channel(entry);
        spawn_printer(&channel, cli.json);
        manager.insert(channel);
    }

    let mut opened = 0usize;
    for (name, outcome) in manager.open_all().await {
        match outcome {
            Ok(()) => {
                info!(channel = %name, "open");
                opened += 1;
            }
            Err(e) => warn!(channel = %name, error = %e, "open failed"),
        }
    }
    if opened == 0 {
        bail!("no channel could be opened");
    }

    info!("monitoring {opened} channel(s), Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    manager.close_all().await;
    Ok(())
}
