use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::interface::HANDSHAKE_TOKEN;
use super::{CommandSpec, ResponseMatcher, Result, SerialError, SerialInterface};

/// Highest dot pattern a six-dot cell can show.
pub const MAX_PATTERN: u8 = 63;

/// Commands understood by the module firmware, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    WriteModule { module: usize, glyph: char },
    Test,
    Status,
    Reset,
    Pattern(u8),
}

impl DeviceCommand {
    pub fn pattern(value: u8) -> Result<Self> {
        if value > MAX_PATTERN {
            return Err(SerialError::ProtocolError(format!(
                "pattern {} out of range 0-{}",
                value, MAX_PATTERN
            )));
        }
        Ok(DeviceCommand::Pattern(value))
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::WriteModule { .. } => "WRITE_MODULE",
            DeviceCommand::Test => "TEST",
            DeviceCommand::Status => "STATUS",
            DeviceCommand::Reset => "RESET",
            DeviceCommand::Pattern(_) => "PATTERN",
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            DeviceCommand::WriteModule { module, glyph } => {
                format!("WRITE_MODULE:{}:{}", module, glyph)
            }
            DeviceCommand::Pattern(value) => format!("PATTERN:{}", value),
            other => other.name().to_string(),
        }
    }
}

/// What a device said about a `WRITE_MODULE` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    /// `OK` or `DONE` seen
    Displayed,
    /// First `ERROR:` reason; wins over any success token
    DeviceError(String),
    /// Nothing recognizable arrived in time
    Unconfirmed,
}

impl WriteOutcome {
    pub fn from_lines(lines: &[String]) -> Self {
        if let Some(reason) = lines.iter().find_map(|l| l.strip_prefix("ERROR:")) {
            return WriteOutcome::DeviceError(reason.trim().to_string());
        }
        if lines.iter().any(|l| l == "OK" || l == "DONE") {
            WriteOutcome::Displayed
        } else {
            WriteOutcome::Unconfirmed
        }
    }
}

/// Response timing shared by every command on a session.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolTiming {
    /// Quiet gap that ends a best-effort drain
    pub settle_delay: Duration,
    /// Upper bound on waiting for a write acknowledgement
    pub response_timeout: Duration,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            response_timeout: Duration::from_millis(2500),
        }
    }
}

/// Braille module protocol on top of a handshaken session
pub struct DisplayProtocol {
    interface: SerialInterface,
    timing: ProtocolTiming,
}

impl DisplayProtocol {
    pub fn new(interface: SerialInterface, timing: ProtocolTiming) -> Self {
        Self { interface, timing }
    }

    /// Show `glyph` on one module of this device.
    pub async fn write_module(&mut self, module: usize, glyph: char) -> Result<WriteOutcome> {
        let command = DeviceCommand::WriteModule { module, glyph };
        let spec = CommandSpec::until_terminal(command.name(), self.timing.response_timeout);
        let lines = self.interface.send(&command.to_line(), &spec).await?;

        for warning in lines.iter().filter_map(|l| l.strip_prefix("WARN:")) {
            log::warn!(
                "[{}] module {} warning: {}",
                self.interface.address(),
                module,
                warning.trim()
            );
        }

        Ok(WriteOutcome::from_lines(&lines))
    }

    /// Run the firmware self test; free-text lines come back as-is.
    pub async fn test(&mut self) -> Result<Vec<String>> {
        self.drain(DeviceCommand::Test).await
    }

    /// True if the device answers `READY`. Returns as soon as it does.
    pub async fn status(&mut self) -> Result<bool> {
        let command = DeviceCommand::Status;
        let spec = CommandSpec {
            name: command.name(),
            window: self.timing.settle_delay,
            settle: Some(self.timing.settle_delay),
            matcher: ResponseMatcher::UntilPrefix(HANDSHAKE_TOKEN),
        };
        let lines = self.interface.send(&command.to_line(), &spec).await?;
        Ok(lines.iter().any(|l| l == HANDSHAKE_TOKEN))
    }

    /// Drop every solenoid. True if the device acknowledged.
    pub async fn reset(&mut self) -> Result<bool> {
        let lines = self.drain(DeviceCommand::Reset).await?;
        let ok = lines.iter().any(|l| l == "OK");
        if !ok {
            log::warn!("[{}] RESET not acknowledged: {:?}", self.interface.address(), lines);
        }
        Ok(ok)
    }

    /// Raise a raw six-dot pattern on the device.
    pub async fn pattern(&mut self, value: u8) -> Result<WriteOutcome> {
        let lines = self.drain(DeviceCommand::pattern(value)?).await?;
        Ok(WriteOutcome::from_lines(&lines))
    }

    pub fn interface(&self) -> &SerialInterface {
        &self.interface
    }

    pub async fn close(&mut self) {
        self.interface.close().await;
    }

    async fn drain(&mut self, command: DeviceCommand) -> Result<Vec<String>> {
        let spec = CommandSpec::drain(command.name(), self.timing.settle_delay);
        self.interface.send(&command.to_line(), &spec).await
    }
}
