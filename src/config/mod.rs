use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::Endpoint;
use crate::sequencer::text::DEFAULT_ALPHABET;
use crate::sequencer::{Alphabet, SequencerSettings};
use crate::serial::ProtocolTiming;

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_PORTS: [&str; 3] = ["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyACM2"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub address: String,
    /// Falls back to the global baud rate
    #[serde(default)]
    pub baud_rate: Option<u32>,
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            baud_rate: None,
        }
    }
}

/// Runtime configuration. Every field has a default, so a config file only
/// needs the values it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub baud_rate: u32,
    pub modules_per_device: usize,
    pub handshake_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub response_timeout_ms: u64,
    pub display_duration_ms: u64,
    pub alphabet: String,
    pub require_live_device: bool,
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_PORTS.iter().map(|p| EndpointConfig::new(*p)).collect(),
            baud_rate: DEFAULT_BAUD_RATE,
            modules_per_device: 2,
            handshake_timeout_ms: 3000,
            settle_delay_ms: 100,
            response_timeout_ms: 2500,
            display_duration_ms: 2000,
            alphabet: DEFAULT_ALPHABET.to_string(),
            require_live_device: true,
            event_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        log::info!(
            "Loaded configuration from {} ({} endpoint(s))",
            path.display(),
            config.endpoints.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.modules_per_device == 0 {
            return Err(ConfigError::Invalid(
                "modules_per_device must be at least 1".to_string(),
            ));
        }
        if self.display_duration_ms == 0 {
            return Err(ConfigError::Invalid(
                "display_duration_ms must be greater than 0".to_string(),
            ));
        }
        if self.alphabet.is_empty() {
            return Err(ConfigError::Invalid("alphabet must not be empty".to_string()));
        }
        if let Some(c) = self
            .alphabet
            .chars()
            .find(|c| c.is_whitespace() || c.to_lowercase().ne(std::iter::once(*c)))
        {
            return Err(ConfigError::Invalid(format!(
                "alphabet must be lowercase without whitespace, found {:?}",
                c
            )));
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.address.trim().is_empty() {
                return Err(ConfigError::Invalid("endpoint address is empty".to_string()));
            }
            if !seen.insert(endpoint.address.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint address {}",
                    endpoint.address
                )));
            }
        }
        Ok(())
    }

    /// Replace the configured endpoints with plain addresses.
    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = ports.into_iter().map(EndpointConfig::new).collect();
        self
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(index, e)| {
                Endpoint::new(
                    index,
                    e.address.clone(),
                    e.baud_rate.unwrap_or(self.baud_rate),
                    self.modules_per_device,
                )
            })
            .collect()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn display_duration(&self) -> Duration {
        Duration::from_millis(self.display_duration_ms)
    }

    pub fn protocol_timing(&self) -> ProtocolTiming {
        ProtocolTiming {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
        }
    }

    pub fn sequencer_settings(&self) -> SequencerSettings {
        SequencerSettings {
            modules_per_device: self.modules_per_device,
            display_duration: self.display_duration(),
            alphabet: Alphabet::new(&self.alphabet),
            require_live_device: self.require_live_device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = CoordinatorConfig::default();
        config.validate().unwrap();
        let endpoints = config.endpoints();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[2].address, "/dev/ttyACM2");
        assert_eq!(endpoints[2].index, 2);
        assert!(endpoints.iter().all(|e| e.baud_rate == 115200 && e.modules == 2));
        assert_eq!(config.display_duration(), Duration::from_secs(2));
        assert_eq!(config.protocol_timing().settle_delay, Duration::from_millis(100));
    }

    #[test]
    fn load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "endpoints": [
                    {{"address": "/dev/ttyUSB0"}},
                    {{"address": "COM4", "baud_rate": 9600}}
                ],
                "display_duration_ms": 500
            }}"#
        )
        .unwrap();

        let config = CoordinatorConfig::load(file.path()).unwrap();
        let endpoints = config.endpoints();
        assert_eq!(endpoints[0].baud_rate, 115200);
        assert_eq!(endpoints[1].baud_rate, 9600);
        assert_eq!(config.display_duration_ms, 500);
        assert_eq!(config.modules_per_device, 2);
        assert!(config.require_live_device);
    }

    #[test]
    fn load_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            CoordinatorConfig::load(file.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn validation_errors() {
        let mut config = CoordinatorConfig::default();
        config.modules_per_device = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = CoordinatorConfig::default().with_ports(["a", "a"]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = CoordinatorConfig::default();
        config.alphabet = "abC".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = CoordinatorConfig::default();
        config.display_duration_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn with_ports_replaces_endpoints() {
        let config = CoordinatorConfig::default().with_ports(["/dev/ttyUSB3"]);
        assert_eq!(config.endpoints(), vec![Endpoint::new(0, "/dev/ttyUSB3", 115200, 2)]);
    }
}
