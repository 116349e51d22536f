//! RF generator protocol driver
//!
//! CR-delimited ASCII command set as spoken by plasma-power RF
//! generators: short lowercase commands (`trg`, `off`, `set0300`), which
//! the device echoes back, and three-letter status replies (`RON`,
//! `DSR`, `FW0250`). The driver keeps a live status snapshot, suppresses
//! command echoes, answers queries through the channel's exchange
//! engine, and polls the fault register in the background.

use crate::core::channel::{Channel, ChannelConfig, FrameHandler};
use crate::core::event::EventKind;
use crate::core::framing::Framing;
use crate::core::manager::{parse_arg, CommandError, CommandRegistry};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Default reply timeout for generator commands
pub const DEFAULT_RF_TIMEOUT_MS: u64 = 300;
/// Highest accepted power setpoint
pub const MAX_POWER_W: u32 = 1000;

const REMOTE_MODE_RETRIES: u32 = 3;

/// Generator control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ControlMode {
    /// Front-panel control
    #[default]
    Local,
    /// Serial remote control
    DigitalRemote,
    /// Analog input control
    Analog,
}

/// Live status snapshot of one generator
#[derive(Debug, Clone, Default, Serialize)]
pub struct RfGeneratorStatus {
    /// Current control mode
    pub mode: ControlMode,
    /// RF output enabled
    pub rf_on: bool,
    /// Forward power, watts
    pub forward_w: u32,
    /// Reflected power, watts
    pub reflected_w: u32,
    /// Power setpoint, watts
    pub setpoint_w: u32,
    /// Raw fault register
    pub fault_code: u32,
    /// Bus address
    pub address: u8,
}

/// Protocol handler for one RF generator channel
pub struct RfGenerator {
    status: RwLock<RfGeneratorStatus>,
    last_cmd: Mutex<String>,
    timeout_ms: u64,
}

impl Default for RfGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RfGenerator {
    /// Create a handler with the default reply timeout
    pub fn new() -> Self {
        Self {
            status: RwLock::new(RfGeneratorStatus::default()),
            last_cmd: Mutex::new(String::new()),
            timeout_ms: DEFAULT_RF_TIMEOUT_MS,
        }
    }

    /// Frame delimiters this protocol uses (bare CR)
    pub fn framing() -> Framing {
        Framing::end_delimited(b"\r")
    }

    /// Build a channel + handler pair for one generator
    pub fn attach(config: ChannelConfig) -> (Channel, Arc<RfGenerator>) {
        let channel = Channel::new(config, Self::framing());
        let handler = Arc::new(RfGenerator::new());
        channel.set_handler(handler.clone());
        (channel, handler)
    }

    /// Current status snapshot
    pub fn status(&self) -> RfGeneratorStatus {
        self.status.read().clone()
    }

    /// Apply one status frame. `background` marks frames from the
    /// unsolicited path as opposed to query replies.
    fn apply_frame(&self, link: &Channel, frame: &[u8], background: bool) {
        let msg = String::from_utf8_lossy(frame).trim().to_string();
        if msg.is_empty() {
            return;
        }
        // the device echoes every command before answering
        if msg.eq_ignore_ascii_case(self.last_cmd.lock().as_str()) {
            return;
        }

        if !self.apply_status(&msg) {
            link.emit(EventKind::CommandError, format!("unrecognized reply: {msg}"));
            link.record_error();
            return;
        }

        let origin = if background { "background" } else { "sync" };
        link.emit(EventKind::Command, format!("{origin} frame applied: {msg}"));
    }

    fn apply_status(&self, msg: &str) -> bool {
        if !msg.is_ascii() {
            return false;
        }

        let mut status = self.status.write();
        match msg {
            "RON" => status.rf_on = true,
            "ROF" => status.rf_on = false,
            "LOC" => status.mode = ControlMode::Local,
            "DSR" => status.mode = ControlMode::DigitalRemote,
            "ANA" => status.mode = ControlMode::Analog,
            _ if msg.len() > 2 => {
                let (prefix, rest) = msg.split_at(2);
                let Ok(value) = rest.parse::<u32>() else {
                    return false;
                };
                match prefix {
                    "FW" => status.forward_w = value,
                    "RE" => status.reflected_w = value,
                    "SE" => status.setpoint_w = value,
                    "SF" => status.fault_code = value,
                    _ => return false,
                }
            }
            _ => return false,
        }
        true
    }

    /// Send a command and wait for the device to echo it back
    async fn command_with_echo(&self, link: &Channel, cmd: &str) -> bool {
        *self.last_cmd.lock() = cmd.to_string();
        link.emit(EventKind::Command, format!("send: {cmd}"));

        let payload = format!("{cmd}\r");
        let expected = cmd.to_string();
        let matcher = move |raw: &[u8]| {
            String::from_utf8_lossy(raw)
                .trim()
                .eq_ignore_ascii_case(&expected)
        };

        matches!(
            link.exchange(payload.as_bytes(), matcher, self.timeout_ms).await,
            Ok(Some(_))
        )
    }

    /// Send a query and wait for a reply the matcher accepts. The
    /// command echo is skipped (matcher returns false for it, leaving
    /// the registration pending for the real reply).
    async fn query(
        &self,
        link: &Channel,
        cmd: &str,
        matcher: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Option<Vec<u8>> {
        *self.last_cmd.lock() = cmd.to_string();
        link.emit(EventKind::Command, format!("query: {cmd}"));

        let payload = format!("{cmd}\r");
        let echo = cmd.to_string();
        let wrapped = move |raw: &[u8]| {
            let text = String::from_utf8_lossy(raw);
            let text = text.trim();
            if text.eq_ignore_ascii_case(&echo) {
                return false;
            }
            matcher(text)
        };

        match link.exchange(payload.as_bytes(), wrapped, self.timeout_ms).await {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                link.emit(EventKind::CommandError, format!("no reply: {cmd}"));
                None
            }
            Err(_) => None,
        }
    }

    // ---- control commands ----

    /// Switch the generator into digital remote mode
    pub async fn enable_remote(&self, link: &Channel) -> bool {
        self.command_with_echo(link, "dre").await
    }

    /// Return the generator to local control
    pub async fn disable_remote(&self, link: &Channel) -> bool {
        self.command_with_echo(link, "drd").await
    }

    /// Enable RF output
    pub async fn rf_on(&self, link: &Channel) -> bool {
        self.command_with_echo(link, "trg").await
    }

    /// Disable RF output
    pub async fn rf_off(&self, link: &Channel) -> bool {
        self.command_with_echo(link, "off").await
    }

    /// Regulate on load power
    pub async fn regulation_load(&self, link: &Channel) -> bool {
        self.command_with_echo(link, "rgl").await
    }

    /// Regulate on forward power
    pub async fn regulation_forward(&self, link: &Channel) -> bool {
        self.command_with_echo(link, "rgf").await
    }

    /// Set the power setpoint in watts (0..=1000)
    pub async fn set_power(&self, link: &Channel, watts: u32) -> bool {
        if watts > MAX_POWER_W {
            link.emit(
                EventKind::CommandError,
                format!("power setpoint out of range: {watts}"),
            );
            return false;
        }
        self.command_with_echo(link, &format!("set{watts:04}")).await
    }

    /// Set the device bus address
    pub async fn set_address(&self, link: &Channel, address: u8) -> bool {
        self.status.write().address = address;
        self.command_with_echo(link, &format!("ads{address}")).await
    }

    // ---- queries ----

    /// Query the control mode
    pub async fn query_mode(&self, link: &Channel) -> ControlMode {
        if let Some(frame) = self
            .query(link, "?mo", |m| matches!(m, "LOC" | "DSR" | "ANA"))
            .await
        {
            self.apply_frame(link, &frame, false);
        }
        self.status.read().mode
    }

    /// Query whether RF output is on
    pub async fn query_rf_state(&self, link: &Channel) -> bool {
        if let Some(frame) = self.query(link, "?ro", |m| matches!(m, "RON" | "ROF")).await {
            self.apply_frame(link, &frame, false);
        }
        self.status.read().rf_on
    }

    /// Query forward power
    pub async fn query_forward_power(&self, link: &Channel) -> u32 {
        if let Some(frame) = self.query(link, "?fw", |m| m.starts_with("FW")).await {
            self.apply_frame(link, &frame, false);
        }
        self.status.read().forward_w
    }

    /// Query reflected power
    pub async fn query_reflected_power(&self, link: &Channel) -> u32 {
        if let Some(frame) = self.query(link, "?re", |m| m.starts_with("RE")).await {
            self.apply_frame(link, &frame, false);
        }
        self.status.read().reflected_w
    }

    /// Query the power setpoint
    pub async fn query_setpoint(&self, link: &Channel) -> u32 {
        if let Some(frame) = self.query(link, "?se", |m| m.starts_with("SE")).await {
            self.apply_frame(link, &frame, false);
        }
        self.status.read().setpoint_w
    }

    /// Query the fault register
    pub async fn query_fault(&self, link: &Channel) -> u32 {
        if let Some(frame) = self.query(link, "?sf", |m| m.starts_with("SF")).await {
            self.apply_frame(link, &frame, false);
        }
        self.status.read().fault_code
    }

    /// Register this generator's operations on a command registry
    pub fn register_commands(rf: &Arc<Self>, link: &Channel, registry: &mut CommandRegistry) {
        let prefix = link.name().to_string();

        {
            let rf = rf.clone();
            let ch = link.clone();
            registry.register(&format!("{prefix}.rf-on"), move |_args| {
                let (rf, ch) = (rf.clone(), ch.clone());
                async move {
                    if rf.rf_on(&ch).await {
                        Ok("RF on".to_string())
                    } else {
                        Err(CommandError::Failed("no echo from generator".into()))
                    }
                }
            });
        }

        {
            let rf = rf.clone();
            let ch = link.clone();
            registry.register(&format!("{prefix}.rf-off"), move |_args| {
                let (rf, ch) = (rf.clone(), ch.clone());
                async move {
                    if rf.rf_off(&ch).await {
                        Ok("RF off".to_string())
                    } else {
                        Err(CommandError::Failed("no echo from generator".into()))
                    }
                }
            });
        }

        {
            let rf = rf.clone();
            let ch = link.clone();
            registry.register(&format!("{prefix}.set-power"), move |args: Vec<String>| {
                let (rf, ch) = (rf.clone(), ch.clone());
                async move {
                    let watts: u32 = parse_arg("set-power", &args, 0)?;
                    if rf.set_power(&ch, watts).await {
                        Ok(format!("setpoint {watts} W"))
                    } else {
                        Err(CommandError::Failed("setpoint rejected".into()))
                    }
                }
            });
        }

        {
            let rf = rf.clone();
            let ch = link.clone();
            registry.register(&format!("{prefix}.status"), move |_args| {
                let (rf, ch) = (rf.clone(), ch.clone());
                async move {
                    rf.query_fault(&ch).await;
                    let status = rf.status();
                    Ok(format!(
                        "mode={:?} rf_on={} fw={}W re={}W se={}W fault={}",
                        status.mode,
                        status.rf_on,
                        status.forward_w,
                        status.reflected_w,
                        status.setpoint_w,
                        status.fault_code
                    ))
                }
            });
        }
    }
}

#[async_trait]
impl FrameHandler for RfGenerator {
    fn on_frame(&self, link: &Channel, frame: &[u8]) {
        if link.unsolicited_enabled() {
            self.apply_frame(link, frame, true);
        }
    }

    async fn init(&self, link: &Channel) {
        for attempt in 1..=REMOTE_MODE_RETRIES {
            if self.query_mode(link).await == ControlMode::DigitalRemote {
                link.emit(EventKind::Command, "remote mode active");
                return;
            }
            if self.enable_remote(link).await {
                link.emit(
                    EventKind::Command,
                    format!("remote mode enabled (attempt {attempt})"),
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        link.emit(
            EventKind::CommandError,
            "remote mode switch failed: retries exhausted",
        );
    }

    async fn poll(&self, link: &Channel) {
        self.query_fault(link).await;
    }
}
