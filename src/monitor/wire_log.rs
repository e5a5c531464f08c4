use std::collections::VecDeque;

use crate::serial::WireEvent;

pub const DEFAULT_WIRE_LOG_CAPACITY: usize = 200;

/// Bounded history of wire traffic; the oldest entry goes first.
#[derive(Debug, Clone)]
pub struct WireLog {
    entries: VecDeque<WireEvent>,
    capacity: usize,
}

impl WireLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: WireEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WireEvent> {
        self.entries.iter()
    }

    /// Entries for one device, oldest first
    pub fn for_device(&self, device: usize) -> Vec<&WireEvent> {
        self.entries.iter().filter(|e| e.device == device).collect()
    }
}

impl Default for WireLog {
    fn default() -> Self {
        Self::new(DEFAULT_WIRE_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::WireDirection;
    use chrono::Utc;

    fn event(device: usize, line: &str) -> WireEvent {
        WireEvent {
            device,
            address: format!("sim{}", device),
            direction: WireDirection::Received,
            line: line.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut log = WireLog::new(2);
        log.push(event(0, "a"));
        log.push(event(1, "b"));
        log.push(event(0, "c"));

        let lines: Vec<&str> = log.iter().map(|e| e.line.as_str()).collect();
        assert_eq!(lines, vec!["b", "c"]);
        assert_eq!(log.for_device(0).len(), 1);
    }
}
