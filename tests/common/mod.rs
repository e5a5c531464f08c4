#![allow(dead_code)]

use std::sync::Arc;

use braille_coordinator_lib::sim::{SimulatedConnector, SimulatedDevice};
use braille_coordinator_lib::{Coordinator, CoordinatorConfig};

/// Config over `addresses` with timings short enough for tests.
pub fn config(addresses: &[&str], display_ms: u64) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default().with_ports(addresses.iter().copied());
    config.handshake_timeout_ms = 500;
    config.settle_delay_ms = 50;
    config.response_timeout_ms = 300;
    config.display_duration_ms = display_ms;
    config
}

pub fn sim_with(devices: &[(&str, SimulatedDevice)]) -> SimulatedConnector {
    devices
        .iter()
        .fold(SimulatedConnector::new(), |sim, (address, device)| {
            sim.with_device(*address, device.clone())
        })
}

/// Coordinator connected to whichever of `config`'s endpoints `sim` knows.
pub async fn connected(config: CoordinatorConfig, sim: &SimulatedConnector) -> Coordinator {
    let coordinator = Coordinator::with_connector(config, Arc::new(sim.clone()));
    coordinator.connect().await;
    coordinator
}

/// `(address, command)` pairs of every write, in arrival order
pub fn writes(sim: &SimulatedConnector) -> Vec<(String, String)> {
    sim.journal().writes()
}

pub fn write(address: &str, module: usize, glyph: char) -> (String, String) {
    (address.to_string(), format!("WRITE_MODULE:{}:{}", module, glyph))
}
