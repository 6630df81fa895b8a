//! Event log collaborators.
//!
//! The supervisor reports task failures and best-effort cleanup problems
//! through an [`EventLog`]. The default forwards to `tracing`; the in-memory
//! variant keeps a bounded buffer for tests and diagnostics.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::util::clock::now_ms;

/// Destination for host-visible log messages.
pub trait EventLog: Send + Sync {
    /// Record an informational message.
    fn log(&self, message: &str);
    /// Record a failure with its error chain.
    fn log_error(&self, message: &str, error: &anyhow::Error);
}

/// Forwards messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log(&self, message: &str) {
        tracing::info!(target: "task_supervisor::event_log", "{message}");
    }

    fn log_error(&self, message: &str, error: &anyhow::Error) {
        tracing::error!(target: "task_supervisor::event_log", error = %format!("{error:#}"), "{message}");
    }
}

/// A recorded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Message passed by the caller.
    pub message: String,
    /// Rendered error chain, for failures.
    pub error: Option<String>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

/// Bounded in-memory log for testing and dev.
#[derive(Debug)]
pub struct InMemoryEventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    max_entries: usize,
}

impl InMemoryEventLog {
    /// Create a log keeping at most `max_entries` entries.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_entries)),
            max_entries,
        }
    }

    /// Snapshot of stored entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entries that carry an error.
    #[must_use]
    pub fn errors(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.error.is_some())
            .cloned()
            .collect()
    }

    fn push(&self, message: &str, error: Option<String>) {
        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            message: message.to_string(),
            error,
            created_at_ms: now_ms(),
        });
    }
}

impl EventLog for InMemoryEventLog {
    fn log(&self, message: &str) {
        self.push(message, None);
    }

    fn log_error(&self, message: &str, error: &anyhow::Error) {
        self.push(message, Some(format!("{error:#}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_in_memory_log_is_bounded() {
        let log = InMemoryEventLog::new(2);
        log.log("one");
        log.log("two");
        log.log_error("three", &anyhow!("boom").context("while running"));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "two");
        assert_eq!(entries[1].error.as_deref(), Some("while running: boom"));
        assert_eq!(log.errors().len(), 1);
    }

    #[test]
    fn test_zero_capacity_log_drops_everything() {
        let log = InMemoryEventLog::new(0);
        log.log("ignored");
        assert!(log.entries().is_empty());
    }
}
