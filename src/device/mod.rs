pub mod models;
pub mod registry;
pub mod router;

pub use models::*;
pub use registry::DeviceRegistry;
pub use router::CharacterRouter;

use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No live device available")]
    NoLiveDevice,

    #[error("Device {0} not found")]
    NotFound(usize),

    #[error("Device {0} not connected")]
    NotConnected(usize),

    #[error("Device {device} reported error: {reason}")]
    DeviceReported { device: usize, reason: String },

    #[error("Invalid device configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] SerialError),
}

impl DeviceError {
    /// Failures that mean the session can no longer be trusted.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, DeviceError::SerialError(e) if e.is_transport_failure())
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
