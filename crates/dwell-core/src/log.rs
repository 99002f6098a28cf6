//! Bounded operator log.
//!
//! Short human-readable status lines, most recent first. Shared between the
//! frame loop and the job lane; nothing is persisted.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_LOG_CAPACITY: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp_text: String,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.timestamp_text, self.message)
    }
}

#[derive(Clone)]
pub struct EventLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Record a status line, evicting the oldest entry past capacity.
    pub fn push(&self, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp_text: chrono::Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
        };
        tracing::info!(target: "dwell::operator", "{}", entry.message);

        let mut entries = self.lock();
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// Snapshot of the current entries, most recent first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Most recent message text, if any.
    pub fn latest(&self) -> Option<String> {
        self.lock().front().map(|e| e.message.clone())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        // A panic while holding the lock leaves the deque structurally intact.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_recent_first() {
        let log = EventLog::default();
        log.push("first");
        log.push("second");
        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["second", "first"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = EventLog::with_capacity(3);
        for i in 0..5 {
            log.push(format!("msg {i}"));
        }
        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["msg 4", "msg 3", "msg 2"]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let log = EventLog::with_capacity(0);
        log.push("only");
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn test_display_format() {
        let entry = LogEntry {
            timestamp_text: "12:00:01".into(),
            message: "Camera ready".into(),
        };
        assert_eq!(entry.to_string(), "[12:00:01] Camera ready");
    }

    #[test]
    fn test_clones_share_entries() {
        let log = EventLog::default();
        let other = log.clone();
        other.push("from clone");
        assert_eq!(log.latest().as_deref(), Some("from clone"));
    }
}
