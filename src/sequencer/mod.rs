//! The write-text job loop.
//!
//! Only one module may be energized at a time, so positions are processed
//! strictly in order and each actuation finishes (command, response and
//! display hold) before the next one starts. Nothing here runs
//! concurrently, whatever the number of idle devices.

pub mod job;
pub mod text;

pub use job::{CancelToken, CharOutcome, JobResult, ProgressEvent};
pub use text::{estimate_duration, normalize, Alphabet, CharClass};

use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::device::{CharacterRouter, DeviceError, DeviceRegistry, ModuleSlot, Result};
use crate::serial::WriteOutcome;

#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub modules_per_device: usize,
    /// How long each character stays raised; also the length of a pause
    pub display_duration: Duration,
    pub alphabet: Alphabet,
    /// Refuse to start a job when no device is live
    pub require_live_device: bool,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            modules_per_device: 2,
            display_duration: Duration::from_secs(2),
            alphabet: Alphabet::default(),
            require_live_device: true,
        }
    }
}

pub struct Sequencer {
    router: CharacterRouter,
    settings: SequencerSettings,
    progress_tx: broadcast::Sender<ProgressEvent>,
}

impl Sequencer {
    pub fn new(settings: SequencerSettings, event_capacity: usize) -> Self {
        let (progress_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            router: CharacterRouter::new(settings.modules_per_device),
            settings,
            progress_tx,
        }
    }

    pub fn settings(&self) -> &SequencerSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    pub fn estimate_duration(&self, text: &str) -> Duration {
        text::estimate_duration_with(text, &self.settings.alphabet, self.settings.display_duration)
    }

    /// Display `text` across the live modules of `registry`.
    ///
    /// Per-character failures are counted, never returned. The only error
    /// is refusing to start: no live device while one is required.
    pub async fn write_text(
        &self,
        registry: &DeviceRegistry,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<JobResult> {
        if self.settings.require_live_device && registry.live_count() == 0 {
            log::error!("Cannot start job: no live device");
            return Err(DeviceError::NoLiveDevice);
        }

        let chars = normalize(text);
        let job_id = Uuid::new_v4();
        let started = Instant::now();
        let mut result = JobResult::new(job_id, chars.len());

        log::info!(
            "Job {}: {} character(s) across {} live device(s), estimated {:.0?}",
            job_id,
            chars.len(),
            registry.live_count(),
            self.estimate_duration(text)
        );

        let mut slot_index = 0usize;
        for (position, &character) in chars.iter().enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let (slot, outcome, hold) = match self.settings.alphabet.classify(character) {
                CharClass::Pause => (None, CharOutcome::Pause, self.settings.display_duration),
                CharClass::Unsupported(_) => (None, CharOutcome::Unsupported, Duration::ZERO),
                CharClass::Glyph(glyph) => {
                    let route = self.router.resolve(slot_index, &registry.live_set());
                    slot_index += 1;
                    match route {
                        Ok(slot) => {
                            let dispatched = Instant::now();
                            let outcome = self.actuate(registry, slot, glyph).await;
                            let hold = if matches!(outcome, CharOutcome::TransportFailed(_)) {
                                Duration::ZERO
                            } else {
                                self.settings.display_duration.saturating_sub(dispatched.elapsed())
                            };
                            (Some(slot), outcome, hold)
                        }
                        Err(_) => (None, CharOutcome::NoDevice, Duration::ZERO),
                    }
                }
            };

            self.report(&mut result, position, slot, character, outcome);

            if !cancel.sleep(hold).await {
                result.cancelled = true;
                break;
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        if result.cancelled {
            log::warn!(
                "Job {} cancelled after {}/{} position(s)",
                job_id,
                result.processed(),
                result.total
            );
        }
        log::info!(
            "Job {} finished in {} ms: {} ok, {} failed, {} unconfirmed, {} skipped, {} pauses",
            job_id,
            result.elapsed_ms,
            result.succeeded,
            result.failed,
            result.unconfirmed,
            result.skipped,
            result.paused
        );
        Ok(result)
    }

    /// One `WRITE_MODULE` exchange under the device's lock.
    async fn actuate(
        &self,
        registry: &DeviceRegistry,
        slot: ModuleSlot,
        glyph: char,
    ) -> CharOutcome {
        let response = registry
            .with_exclusive(slot.device, |protocol| {
                Box::pin(async move {
                    protocol
                        .write_module(slot.module, glyph)
                        .await
                        .map_err(DeviceError::from)
                })
            })
            .await;

        match response {
            Ok(WriteOutcome::Displayed) => CharOutcome::Displayed,
            Ok(WriteOutcome::DeviceError(reason)) => {
                log::warn!(
                    "Device {} module {} rejected '{}': {}",
                    slot.device,
                    slot.module,
                    glyph,
                    reason
                );
                CharOutcome::DeviceError(reason)
            }
            Ok(WriteOutcome::Unconfirmed) => {
                log::warn!(
                    "Device {} module {} gave no acknowledgement for '{}'",
                    slot.device,
                    slot.module,
                    glyph
                );
                CharOutcome::Unconfirmed
            }
            Err(e) => {
                log::error!("Device {} write of '{}' failed: {}", slot.device, glyph, e);
                CharOutcome::TransportFailed(e.to_string())
            }
        }
    }

    fn report(
        &self,
        result: &mut JobResult,
        position: usize,
        slot: Option<ModuleSlot>,
        character: char,
        outcome: CharOutcome,
    ) {
        match (&outcome, slot) {
            (CharOutcome::Pause, _) => {
                log::debug!("[{}/{}] (space)", position + 1, result.total)
            }
            (CharOutcome::Unsupported, _) => {
                log::debug!("[{}/{}] '{}' (unsupported)", position + 1, result.total, character)
            }
            (CharOutcome::NoDevice, _) => {
                log::warn!(
                    "[{}/{}] '{}': no device available",
                    position + 1,
                    result.total,
                    character
                )
            }
            (_, Some(slot)) => log::debug!(
                "[{}/{}] device {} module {}: '{}'",
                position + 1,
                result.total,
                slot.device,
                slot.module,
                character
            ),
            _ => {}
        }

        result.record(&outcome);
        // no subscribers is fine; a lagging one just misses events
        let _ = self.progress_tx.send(ProgressEvent {
            job_id: result.job_id,
            position,
            total: result.total,
            device: slot.map(|s| s.device),
            module: slot.map(|s| s.module),
            character,
            outcome,
            timestamp_ms: Utc::now().timestamp_millis(),
        });
    }
}
