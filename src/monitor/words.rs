use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sequencer::{CharOutcome, ProgressEvent};

/// Completed words kept by default; older ones are dropped first.
pub const DEFAULT_WORD_HISTORY: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedWord {
    pub word: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WordStats {
    pub total_commands: u64,
    pub total_words: u64,
    pub errors: u64,
}

/// Rebuilds words from progress events: characters extend the current
/// word, a pause closes it. Only the most recent words are kept; the
/// counters cover everything seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordAccumulator {
    current: String,
    history: VecDeque<CompletedWord>,
    history_limit: usize,
    stats: WordStats,
}

impl Default for WordAccumulator {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_WORD_HISTORY)
    }
}

impl WordAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(limit: usize) -> Self {
        let history_limit = limit.max(1);
        Self {
            current: String::new(),
            history: VecDeque::with_capacity(history_limit),
            history_limit,
            stats: WordStats::default(),
        }
    }

    /// Feed one event. Returns the word it completed, if any.
    pub fn observe(&mut self, event: &ProgressEvent) -> Option<&CompletedWord> {
        match &event.outcome {
            CharOutcome::Pause => return self.finish_word(),
            CharOutcome::Unsupported | CharOutcome::NoDevice => {}
            outcome => {
                self.stats.total_commands += 1;
                if outcome.is_failure() {
                    self.stats.errors += 1;
                }
                self.current.push(event.character);
            }
        }
        None
    }

    /// Close the word in progress, e.g. at the end of a job.
    pub fn finish_word(&mut self) -> Option<&CompletedWord> {
        if self.current.is_empty() {
            return None;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(CompletedWord {
            word: std::mem::take(&mut self.current),
            timestamp: Utc::now(),
        });
        self.stats.total_words += 1;
        self.history.back()
    }

    pub fn current_word(&self) -> &str {
        &self.current
    }

    /// Recent completed words, oldest first
    pub fn history(&self) -> impl Iterator<Item = &CompletedWord> {
        self.history.iter()
    }

    pub fn stats(&self) -> &WordStats {
        &self.stats
    }
}
