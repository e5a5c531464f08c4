//! Read-only telemetry consumers.
//!
//! Monitors subscribe to the progress and wire broadcasts; they never
//! touch a device session, so they cannot hold up a running job.

pub mod wire_log;
pub mod words;

pub use wire_log::{WireLog, DEFAULT_WIRE_LOG_CAPACITY};
pub use words::{CompletedWord, WordAccumulator, WordStats, DEFAULT_WORD_HISTORY};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;

use crate::sequencer::ProgressEvent;
use crate::serial::WireEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub current_word: String,
    pub words: Vec<CompletedWord>,
    pub stats: WordStats,
    pub wire: Vec<WireEvent>,
}

struct MonitorState {
    words: WordAccumulator,
    wire: WireLog,
}

impl MonitorState {
    fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            current_word: self.words.current_word().to_string(),
            words: self.words.history().cloned().collect(),
            stats: self.words.stats().clone(),
            wire: self.wire.iter().cloned().collect(),
        }
    }
}

/// Background task that accumulates words and wire traffic.
pub struct WordMonitor {
    state: Arc<Mutex<MonitorState>>,
    stop_tx: mpsc::Sender<()>,
    task_handle: tokio::task::JoinHandle<()>,
}

impl WordMonitor {
    /// Keeps the last [`DEFAULT_WORD_HISTORY`] words and `wire_capacity`
    /// wire events.
    pub fn spawn(
        progress_rx: broadcast::Receiver<ProgressEvent>,
        wire_rx: broadcast::Receiver<WireEvent>,
        wire_capacity: usize,
    ) -> Self {
        let state = Arc::new(Mutex::new(MonitorState {
            words: WordAccumulator::new(),
            wire: WireLog::new(wire_capacity),
        }));
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let task_handle = tokio::spawn(Self::monitoring_loop(
            state.clone(),
            progress_rx,
            wire_rx,
            stop_rx,
        ));

        Self {
            state,
            stop_tx,
            task_handle,
        }
    }

    pub async fn snapshot(&self) -> MonitorSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Stop the task, close the word in progress and return the final view.
    pub async fn stop(self) -> MonitorSnapshot {
        let _ = self.stop_tx.send(()).await;
        if timeout(Duration::from_secs(2), self.task_handle).await.is_err() {
            log::warn!("Word monitor did not stop within 2s");
        }

        let mut state = self.state.lock().await;
        state.words.finish_word();
        state.snapshot()
    }

    async fn monitoring_loop(
        state: Arc<Mutex<MonitorState>>,
        mut progress_rx: broadcast::Receiver<ProgressEvent>,
        mut wire_rx: broadcast::Receiver<WireEvent>,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mut progress_open = true;
        let mut wire_open = true;

        while progress_open || wire_open {
            tokio::select! {
                _ = stop_rx.recv() => break,
                event = progress_rx.recv(), if progress_open => match event {
                    Ok(event) => {
                        if let Some(word) = state.lock().await.words.observe(&event) {
                            log::info!("Word displayed: {}", word.word);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Word monitor lagged, {} progress event(s) missed", missed)
                    }
                    Err(RecvError::Closed) => progress_open = false,
                },
                event = wire_rx.recv(), if wire_open => match event {
                    Ok(event) => state.lock().await.wire.push(event),
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Word monitor lagged, {} wire event(s) missed", missed)
                    }
                    Err(RecvError::Closed) => wire_open = false,
                },
            }
        }

        // take whatever was already queued when the stop arrived
        let mut state = state.lock().await;
        loop {
            match progress_rx.try_recv() {
                Ok(event) => {
                    state.words.observe(&event);
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        loop {
            match wire_rx.try_recv() {
                Ok(event) => state.wire.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }
}
