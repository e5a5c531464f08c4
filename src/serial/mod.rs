pub mod connector;
pub mod interface;
pub mod protocol;

pub use connector::{available_ports, Connector, NativeConnector, PortIo};
pub use interface::{CommandSpec, ResponseMatcher, SerialInterface, WireDirection, WireEvent};
pub use protocol::{DeviceCommand, DisplayProtocol, ProtocolTiming, WriteOutcome};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Handshake failed on {port}: no READY within {timeout_ms} ms")]
    HandshakeFailed { port: String, timeout_ms: u64 },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("Write to device timed out")]
    Timeout,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// True when the link itself is gone or unusable, as opposed to a
    /// malformed exchange on a healthy link.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            SerialError::Disconnected(_)
                | SerialError::Timeout
                | SerialError::IoError(_)
                | SerialError::SerialportError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;
