//! In-memory stand-in for the module firmware.
//!
//! Each simulated port is one end of a `tokio::io::duplex` pipe with a
//! firmware task on the other end speaking the same line protocol as the
//! real controllers. Used for dry runs (`--simulate`) and by the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};

use crate::device::Endpoint;
use crate::serial::protocol::MAX_PATTERN;
use crate::serial::{Connector, PortIo, Result, SerialError};

/// How a simulated device answers `WRITE_MODULE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteReply {
    Done,
    Ok,
    Error(String),
    Silent,
}

#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub boot_lines: Vec<String>,
    pub handshake: bool,
    pub modules: usize,
    pub write_reply: WriteReply,
    /// Time a module stays energized before the device replies
    pub hold: Duration,
    /// Close the link when this many commands have been handled
    pub drop_after: Option<usize>,
    pub test_lines: Vec<String>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            boot_lines: vec!["Braille controller booting".to_string()],
            handshake: true,
            modules: 2,
            write_reply: WriteReply::Done,
            hold: Duration::ZERO,
            drop_after: None,
            test_lines: vec![
                "Testing module 0".to_string(),
                "Testing module 1".to_string(),
                "Test complete".to_string(),
            ],
        }
    }
}

impl SimulatedDevice {
    pub fn without_handshake(mut self) -> Self {
        self.handshake = false;
        self
    }

    pub fn write_reply(mut self, reply: WriteReply) -> Self {
        self.write_reply = reply;
        self
    }

    pub fn hold_for(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn drop_link_after(mut self, commands: usize) -> Self {
        self.drop_after = Some(commands);
        self
    }
}

/// A command as seen by a simulated device.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub address: String,
    pub command: String,
    pub received: Instant,
    pub completed: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<CommandRecord>>>);

impl Journal {
    pub fn commands_for(&self, address: &str) -> Vec<String> {
        lock(&self.0)
            .iter()
            .filter(|r| r.address == address)
            .map(|r| r.command.clone())
            .collect()
    }

    /// `(address, command)` for every `WRITE_MODULE` in arrival order.
    pub fn writes(&self) -> Vec<(String, String)> {
        let mut writes: Vec<CommandRecord> = lock(&self.0)
            .iter()
            .filter(|r| r.command.starts_with("WRITE_MODULE:"))
            .cloned()
            .collect();
        writes.sort_by_key(|r| r.received);
        writes.into_iter().map(|r| (r.address, r.command)).collect()
    }

    /// True if any two `WRITE_MODULE` commands were in progress at once,
    /// across all devices.
    pub fn has_overlap(&self) -> bool {
        let mut writes: Vec<CommandRecord> = lock(&self.0)
            .iter()
            .filter(|r| r.command.starts_with("WRITE_MODULE:"))
            .cloned()
            .collect();
        writes.sort_by_key(|r| r.received);
        writes.windows(2).any(|w| w[1].received < w[0].completed)
    }

    fn push(&self, record: CommandRecord) {
        lock(&self.0).push(record);
    }
}

#[derive(Default)]
struct SimState {
    devices: Mutex<HashMap<String, SimulatedDevice>>,
    opens: Mutex<HashMap<String, usize>>,
    journal: Journal,
    energized: AtomicUsize,
    peak: AtomicUsize,
}

/// Connector whose ports are simulated devices keyed by address.
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    state: Arc<SimState>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, address: impl Into<String>, device: SimulatedDevice) -> Self {
        lock(&self.state.devices).insert(address.into(), device);
        self
    }

    pub fn journal(&self) -> Journal {
        self.state.journal.clone()
    }

    /// Times `address` has been opened
    pub fn open_count(&self, address: &str) -> usize {
        lock(&self.state.opens).get(address).copied().unwrap_or(0)
    }

    /// Most modules ever energized at the same instant, across all devices
    pub fn peak_energized(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for SimulatedConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn PortIo>> {
        let device = lock(&self.state.devices)
            .get(&endpoint.address)
            .cloned()
            .ok_or_else(|| {
                let reason = format!("{}: no such simulated port", endpoint.address);
                SerialError::ConnectionFailed(reason)
            })?;
        *lock(&self.state.opens)
            .entry(endpoint.address.clone())
            .or_insert(0) += 1;

        let (host, firmware) = tokio::io::duplex(4096);
        tokio::spawn(run_firmware(
            firmware,
            endpoint.address.clone(),
            device,
            self.state.clone(),
        ));
        Ok(Box::new(host))
    }
}

async fn run_firmware(
    io: DuplexStream,
    address: String,
    device: SimulatedDevice,
    state: Arc<SimState>,
) {
    let (read, mut write) = tokio::io::split(io);
    let mut lines = BufReader::new(read).lines();

    for line in &device.boot_lines {
        if write_line(&mut write, line).await.is_err() {
            return;
        }
    }
    if device.handshake && write_line(&mut write, "READY").await.is_err() {
        return;
    }

    let mut handled = 0usize;
    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }
        if device.drop_after.is_some_and(|n| handled >= n) {
            log::debug!("[{}] simulated link dropped", address);
            return;
        }
        handled += 1;

        let received = Instant::now();
        let reply = respond(&command, &device, &state).await;
        state.journal.push(CommandRecord {
            address: address.clone(),
            command,
            received,
            completed: Instant::now(),
        });

        for line in reply {
            if write_line(&mut write, &line).await.is_err() {
                return;
            }
        }
    }
}

async fn respond(command: &str, device: &SimulatedDevice, state: &SimState) -> Vec<String> {
    if let Some(args) = command.strip_prefix("WRITE_MODULE:") {
        let mut parts = args.splitn(2, ':');
        let module = parts.next().and_then(|m| m.parse::<usize>().ok());
        let glyph = parts.next().and_then(|g| g.chars().next());
        return match (module, glyph) {
            (Some(m), Some(_)) if m < device.modules => write_module(device, state).await,
            (Some(_), Some(_)) => vec!["ERROR:INVALID_MODULE".to_string()],
            _ => vec!["ERROR:BAD_COMMAND".to_string()],
        };
    }
    if let Some(value) = command.strip_prefix("PATTERN:") {
        return match value.parse::<u8>() {
            Ok(v) if v <= MAX_PATTERN => vec!["OK".to_string()],
            _ => vec!["ERROR:INVALID_PATTERN".to_string()],
        };
    }
    match command {
        "TEST" => device.test_lines.clone(),
        "STATUS" => vec!["READY".to_string()],
        "RESET" => vec!["OK".to_string()],
        _ => vec!["ERROR:UNKNOWN_COMMAND".to_string()],
    }
}

async fn write_module(device: &SimulatedDevice, state: &SimState) -> Vec<String> {
    let now = state.energized.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(now, Ordering::SeqCst);
    if !device.hold.is_zero() {
        tokio::time::sleep(device.hold).await;
    }
    state.energized.fetch_sub(1, Ordering::SeqCst);

    match &device.write_reply {
        WriteReply::Done => vec!["START".to_string(), "DONE".to_string()],
        WriteReply::Ok => vec!["START".to_string(), "OK".to_string()],
        WriteReply::Error(reason) => vec!["START".to_string(), format!("ERROR:{}", reason)],
        WriteReply::Silent => Vec::new(),
    }
}

async fn write_line<W: AsyncWrite + Unpin>(write: &mut W, line: &str) -> std::io::Result<()> {
    write.write_all(format!("{}\r\n", line).as_bytes()).await?;
    write.flush().await
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
