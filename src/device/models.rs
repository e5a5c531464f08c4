use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured serial connection. Built from configuration at startup
/// and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub index: usize,
    pub address: String,
    pub baud_rate: u32,
    pub modules: usize,
}

impl Endpoint {
    pub fn new(index: usize, address: impl Into<String>, baud_rate: u32, modules: usize) -> Self {
        Self {
            index,
            address: address.into(),
            baud_rate,
            modules,
        }
    }
}

/// A physical actuation point: module `module` on device `device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleSlot {
    pub device: usize,
    pub module: usize,
}

/// Device connection state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub index: usize,
    pub address: String,
    pub baud_rate: u32,
    pub live: bool,
    pub connection_state: ConnectionState,
    pub last_handshake: Option<DateTime<Utc>>,
}

/// Outcome of connecting one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectReport {
    pub index: usize,
    pub address: String,
    pub connected: bool,
    pub error: Option<String>,
}

/// Per-device answer to a broadcast command (TEST, RESET, STATUS).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub index: usize,
    pub address: String,
    pub ok: bool,
    pub lines: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub total_devices: usize,
    pub live_count: usize,
    pub modules_per_device: usize,
    pub total_modules: usize,
    pub live_modules: usize,
    pub devices: Vec<DeviceSnapshot>,
}
