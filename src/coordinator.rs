use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::config::CoordinatorConfig;
use crate::device::{
    ConnectReport, DeviceError, DeviceRegistry, DeviceResponse, Result, SystemStatus,
};
use crate::sequencer::{CancelToken, JobResult, ProgressEvent, Sequencer};
use crate::serial::{Connector, NativeConnector, WireEvent, WriteOutcome};

/// Public entry point: connection management, text jobs and maintenance
/// commands over every configured device.
///
/// Anything that can energize a solenoid (text jobs, TEST, PATTERN) runs
/// under one actuation gate, so two callers can never drive modules at
/// the same time even on different devices.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: DeviceRegistry,
    sequencer: Sequencer,
    actuation: Mutex<()>,
}

impl Coordinator {
    /// Coordinator over real serial ports
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_connector(config, Arc::new(NativeConnector))
    }

    pub fn with_connector(config: CoordinatorConfig, connector: Arc<dyn Connector>) -> Self {
        let registry = DeviceRegistry::new(
            config.endpoints(),
            connector,
            config.protocol_timing(),
            config.event_capacity,
        );
        let sequencer = Sequencer::new(config.sequencer_settings(), config.event_capacity);

        Self {
            config,
            registry,
            sequencer,
            actuation: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Connect every endpoint; partial success is reported, not an error.
    pub async fn connect(&self) -> Vec<ConnectReport> {
        self.registry.connect_all(self.config.handshake_timeout()).await
    }

    pub async fn disconnect(&self) {
        self.registry.disconnect_all().await;
    }

    pub async fn write_text(&self, text: &str) -> Result<JobResult> {
        self.write_text_cancellable(text, &CancelToken::new()).await
    }

    /// Like [`Self::write_text`], stopping early once `cancel` fires.
    pub async fn write_text_cancellable(
        &self,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<JobResult> {
        let _gate = self.actuation.lock().await;
        self.sequencer.write_text(&self.registry, text, cancel).await
    }

    /// Kept for callers of the old parallel path. Actuation is always
    /// sequential because only one module may be powered at a time.
    pub async fn write_text_parallel(&self, text: &str) -> Result<JobResult> {
        self.write_text(text).await
    }

    pub fn estimate_duration(&self, text: &str) -> Duration {
        self.sequencer.estimate_duration(text)
    }

    /// Run `TEST` on every live device and collect what each one printed.
    pub async fn test_all_modules(&self) -> Vec<DeviceResponse> {
        let _gate = self.actuation.lock().await;
        let mut responses = Vec::new();

        for index in self.registry.live_indices() {
            let result = self
                .registry
                .with_exclusive(index, |protocol| {
                    Box::pin(async move { protocol.test().await.map_err(DeviceError::from) })
                })
                .await;
            responses.push(self.response(index, result.map(|lines| (true, lines))));
        }
        responses
    }

    /// Send `RESET` to every live device. Best effort: failures are
    /// reported per device.
    pub async fn reset_all(&self) -> Vec<DeviceResponse> {
        log::info!("Resetting all devices");
        let mut responses = Vec::new();

        for index in self.registry.live_indices() {
            let result = self
                .registry
                .with_exclusive(index, |protocol| {
                    Box::pin(async move { protocol.reset().await.map_err(DeviceError::from) })
                })
                .await;
            responses.push(self.response(index, result.map(|ok| (ok, Vec::new()))));
        }
        responses
    }

    /// `STATUS` every configured device; only live devices answering
    /// `READY` are healthy.
    pub async fn check_health(&self) -> Vec<DeviceResponse> {
        let mut responses = Vec::new();

        for index in 0..self.registry.len() {
            let result = self
                .registry
                .with_exclusive(index, |protocol| {
                    Box::pin(async move { protocol.status().await.map_err(DeviceError::from) })
                })
                .await;
            responses.push(self.response(index, result.map(|ready| (ready, Vec::new()))));
        }
        responses
    }

    /// Raise a raw six-dot pattern (0-63) on one device. `Ok(false)` means
    /// the device never acknowledged it.
    pub async fn send_pattern(&self, device: usize, pattern: u8) -> Result<bool> {
        let _gate = self.actuation.lock().await;
        let outcome = self
            .registry
            .with_exclusive(device, |protocol| {
                Box::pin(async move { protocol.pattern(pattern).await.map_err(DeviceError::from) })
            })
            .await?;

        match outcome {
            WriteOutcome::Displayed => Ok(true),
            WriteOutcome::Unconfirmed => Ok(false),
            WriteOutcome::DeviceError(reason) => {
                Err(DeviceError::DeviceReported { device, reason })
            }
        }
    }

    pub async fn status(&self) -> SystemStatus {
        let devices = self.registry.snapshots().await;
        let modules_per_device = self.config.modules_per_device;
        let live_count = devices.iter().filter(|d| d.live).count();

        SystemStatus {
            total_devices: devices.len(),
            live_count,
            modules_per_device,
            total_modules: devices.len() * modules_per_device,
            live_modules: live_count * modules_per_device,
            devices,
        }
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sequencer.subscribe()
    }

    pub fn subscribe_wire(&self) -> broadcast::Receiver<WireEvent> {
        self.registry.subscribe_wire()
    }

    fn response(&self, index: usize, result: Result<(bool, Vec<String>)>) -> DeviceResponse {
        let address = self
            .registry
            .endpoint(index)
            .map(|e| e.address.clone())
            .unwrap_or_default();

        match result {
            Ok((ok, lines)) => DeviceResponse {
                index,
                address,
                ok,
                lines,
                error: None,
            },
            Err(e) => DeviceResponse {
                index,
                address,
                ok: false,
                lines: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}
