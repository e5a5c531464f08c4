use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::time::{timeout, timeout_at, Instant};

use super::{Connector, PortIo, Result, SerialError};
use crate::device::Endpoint;

/// Line a device emits once after reset when it is ready for commands.
pub const HANDSHAKE_TOKEN: &str = "READY";

/// Shortest time a command write may block before the link counts as stuck
const WRITE_TIMEOUT_FLOOR: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireDirection {
    Sent,
    Received,
}

/// One line crossing a serial link, published for telemetry consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub device: usize,
    pub address: String,
    pub direction: WireDirection,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

/// Decides when a response is complete before its window runs out.
#[derive(Debug, Clone)]
pub enum ResponseMatcher {
    /// Never completes early; collect until the link goes quiet.
    Drain,
    /// `OK`, `DONE` or any `ERROR:` line.
    Terminal,
    /// Any line starting with the prefix.
    UntilPrefix(&'static str),
}

impl ResponseMatcher {
    pub fn is_complete(&self, lines: &[String]) -> bool {
        match self {
            ResponseMatcher::Drain => false,
            ResponseMatcher::Terminal => lines
                .iter()
                .any(|l| l == "OK" || l == "DONE" || l.starts_with("ERROR:")),
            ResponseMatcher::UntilPrefix(p) => lines.iter().any(|l| l.starts_with(p)),
        }
    }
}

/// How long to listen after a command and when to stop.
///
/// The session waits up to `window` for the first line. With a `settle`
/// delay, collection ends once no further line arrives within `settle` of
/// the previous one; without it, collection runs to the end of `window`.
/// Either way the matcher can end it sooner.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub window: Duration,
    pub settle: Option<Duration>,
    pub matcher: ResponseMatcher,
}

impl CommandSpec {
    /// Best-effort drain of whatever the device produces within `settle`.
    pub fn drain(name: &'static str, settle: Duration) -> Self {
        Self {
            name,
            window: settle,
            settle: Some(settle),
            matcher: ResponseMatcher::Drain,
        }
    }

    /// Wait up to `window` for a terminal token.
    pub fn until_terminal(name: &'static str, window: Duration) -> Self {
        Self {
            name,
            window,
            settle: None,
            matcher: ResponseMatcher::Terminal,
        }
    }
}

/// One live serial session: a byte stream plus the line protocol on top.
pub struct SerialInterface {
    stream: Option<BufReader<Box<dyn PortIo>>>,
    partial: Vec<u8>,
    device: usize,
    address: String,
    handshake_at: Option<DateTime<Utc>>,
    wire_tx: Option<broadcast::Sender<WireEvent>>,
}

impl SerialInterface {
    /// Wrap an already-open stream. The session is not usable until
    /// [`Self::await_handshake`] succeeds.
    pub fn from_io(
        endpoint: &Endpoint,
        io: Box<dyn PortIo>,
        wire_tx: Option<broadcast::Sender<WireEvent>>,
    ) -> Self {
        Self {
            stream: Some(BufReader::new(io)),
            partial: Vec::new(),
            device: endpoint.index,
            address: endpoint.address.clone(),
            handshake_at: None,
            wire_tx,
        }
    }

    /// Open the endpoint and wait for its READY line.
    pub async fn open(
        endpoint: &Endpoint,
        connector: &dyn Connector,
        handshake_timeout: Duration,
        wire_tx: Option<broadcast::Sender<WireEvent>>,
    ) -> Result<Self> {
        let io = connector.open(endpoint).await?;
        let mut interface = Self::from_io(endpoint, io, wire_tx);

        if let Err(e) = interface.await_handshake(handshake_timeout).await {
            interface.close().await;
            return Err(e);
        }

        log::info!("Connected to {} (device {})", endpoint.address, endpoint.index);
        Ok(interface)
    }

    /// Wait up to `handshake_timeout` for `READY`, ignoring anything else.
    pub async fn await_handshake(&mut self, handshake_timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + handshake_timeout;

        while let Some(line) = self.next_line_until(deadline).await? {
            if line == HANDSHAKE_TOKEN {
                self.handshake_at = Some(Utc::now());
                return Ok(());
            }
            log::debug!("[{}] ignoring pre-handshake line: {}", self.address, line);
        }

        Err(SerialError::HandshakeFailed {
            port: self.address.clone(),
            timeout_ms: handshake_timeout.as_millis() as u64,
        })
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Open and handshake completed
    pub fn is_ready(&self) -> bool {
        self.is_open() && self.handshake_at.is_some()
    }

    pub fn handshake_at(&self) -> Option<DateTime<Utc>> {
        self.handshake_at
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Write one command line and collect the response lines per `spec`.
    /// An empty list means the device said nothing in time.
    pub async fn send(&mut self, command: &str, spec: &CommandSpec) -> Result<Vec<String>> {
        if !self.is_ready() {
            return Err(SerialError::ConnectionFailed(format!(
                "{}: session not ready",
                self.address
            )));
        }

        self.discard_pending().await?;

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SerialError::Disconnected(self.address.clone()))?;
        let line = format!("{}\n", command);
        let write = async {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await
        };
        match timeout(spec.window.max(WRITE_TIMEOUT_FLOOR), write).await {
            Ok(written) => written?,
            Err(_) => return Err(SerialError::Timeout),
        }
        self.publish(WireDirection::Sent, command);

        let started = Instant::now();
        let hard_deadline = started + spec.window;
        let mut lines = Vec::new();

        loop {
            let wait_until = match spec.settle {
                Some(settle) if !lines.is_empty() => (Instant::now() + settle).min(hard_deadline),
                _ => hard_deadline,
            };
            let next = match self.next_line_until(wait_until).await {
                Ok(next) => next,
                Err(e) => {
                    // the lines already went out as wire events; the link is what failed
                    if !lines.is_empty() {
                        log::warn!(
                            "[{}] link lost during {} after {} line(s): {:?}",
                            self.address,
                            spec.name,
                            lines.len(),
                            lines
                        );
                    }
                    return Err(e);
                }
            };
            match next {
                Some(line) => {
                    lines.push(line);
                    if spec.matcher.is_complete(&lines) {
                        break;
                    }
                }
                None => break,
            }
        }

        if lines.is_empty() {
            log::debug!(
                "[{}] {} produced no response within {:?}",
                self.address,
                spec.name,
                spec.window
            );
        }
        Ok(lines)
    }

    /// Release the link. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                log::debug!("[{}] shutdown on close failed: {}", self.address, e);
            }
            log::info!("Disconnected from {}", self.address);
        }
        self.handshake_at = None;
        self.partial.clear();
    }

    /// Drop lines that arrived since the last exchange so they are not
    /// mistaken for the next command's response.
    async fn discard_pending(&mut self) -> Result<()> {
        while let Some(stale) = self.next_line_until(Instant::now()).await? {
            log::debug!("[{}] discarding stale line: {}", self.address, stale);
        }
        Ok(())
    }

    /// Next non-empty line, or `None` once `deadline` passes.
    async fn next_line_until(&mut self, deadline: Instant) -> Result<Option<String>> {
        let line = loop {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| SerialError::Disconnected(self.address.clone()))?;

            // read_until keeps partial bytes in `partial` when the timeout fires
            match timeout_at(deadline, stream.read_until(b'\n', &mut self.partial)).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(SerialError::IoError(e)),
                Ok(Ok(0)) => {
                    return Err(SerialError::Disconnected(format!(
                        "{}: end of stream",
                        self.address
                    )))
                }
                Ok(Ok(_)) => {
                    let raw = std::mem::take(&mut self.partial);
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if !line.is_empty() {
                        break line;
                    }
                }
            }
        };

        self.publish(WireDirection::Received, &line);
        Ok(Some(line))
    }

    fn publish(&self, direction: WireDirection, line: &str) {
        match direction {
            WireDirection::Sent => log::debug!("[{}] -> {}", self.address, line),
            WireDirection::Received => log::debug!("[{}] <- {}", self.address, line),
        }
        if let Some(tx) = &self.wire_tx {
            // No subscribers is fine
            let _ = tx.send(WireEvent {
                device: self.device,
                address: self.address.clone(),
                direction,
                line: line.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}
