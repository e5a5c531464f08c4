use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Result of one processed stream position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CharOutcome {
    Displayed,
    /// Device answered `ERROR:<reason>`
    DeviceError(String),
    /// No recognized token before the response window closed
    Unconfirmed,
    TransportFailed(String),
    Pause,
    Unsupported,
    NoDevice,
}

impl CharOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CharOutcome::DeviceError(_) | CharOutcome::TransportFailed(_))
    }
}

/// Emitted once per processed position; the contract monitoring
/// consumers build on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub position: usize,
    pub total: usize,
    pub device: Option<usize>,
    pub module: Option<usize>,
    pub character: char,
    pub outcome: CharOutcome,
    pub timestamp_ms: i64,
}

/// Counts for a finished (or cancelled) job. Positions are partitioned:
/// `succeeded + failed + skipped + paused + unconfirmed` equals the number
/// of positions processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub paused: usize,
    pub unconfirmed: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl JobResult {
    pub fn new(job_id: Uuid, total: usize) -> Self {
        Self {
            job_id,
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            paused: 0,
            unconfirmed: 0,
            cancelled: false,
            elapsed_ms: 0,
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.paused + self.unconfirmed
    }

    pub(crate) fn record(&mut self, outcome: &CharOutcome) {
        match outcome {
            CharOutcome::Displayed => self.succeeded += 1,
            CharOutcome::DeviceError(_) | CharOutcome::TransportFailed(_) => self.failed += 1,
            CharOutcome::Unconfirmed => self.unconfirmed += 1,
            CharOutcome::Pause => self.paused += 1,
            CharOutcome::Unsupported | CharOutcome::NoDevice => self.skipped += 1,
        }
    }
}

/// Cooperative stop signal for a running job.
///
/// Clones share the same signal. The sequencer checks it between
/// positions and while sleeping; an in-flight command always completes.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // the sender lives as long as self, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep unless cancelled first. Returns false if cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = self.cancelled() => false,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn outcome_counts() {
        let mut result = JobResult::new(Uuid::new_v4(), 7);
        for outcome in [
            CharOutcome::Displayed,
            CharOutcome::DeviceError("JAMMED".into()),
            CharOutcome::TransportFailed("gone".into()),
            CharOutcome::Unconfirmed,
            CharOutcome::Pause,
            CharOutcome::Unsupported,
            CharOutcome::NoDevice,
        ] {
            result.record(&outcome);
        }
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(result.unconfirmed, 1);
        assert_eq!(result.paused, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.processed(), 7);
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_string(&CharOutcome::DeviceError("JAMMED".into())).unwrap();
        assert_eq!(json, r#"{"kind":"device_error","detail":"JAMMED"}"#);
        let json = serde_json::to_string(&CharOutcome::Pause).unwrap();
        assert_eq!(json, r#"{"kind":"pause"}"#);
    }

    #[tokio::test]
    async fn cancel_interrupts_sleep() {
        let token = CancelToken::new();
        let other = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other.cancel();
        });

        let started = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn uncancelled_sleep_runs_to_completion() {
        let token = CancelToken::new();
        let started = Instant::now();
        assert!(token.sleep(Duration::from_millis(20)).await);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
