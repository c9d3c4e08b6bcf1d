//! Structured log and error lines collected during one run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jiff::Timestamp;
use serde_json::{Value, json};

use crate::Error;

/// Log and error entries of a run, in the order they were recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunLogEntries {
    /// Informational entries.
    pub logs: Vec<Value>,
    /// Error entries.
    pub errors: Vec<Value>,
}

/// Collects the log lines of one run.
///
/// Cloned handles share the same entries; the orchestrator hands one to the
/// writer and persists the collected entries on the run record at the end.
#[derive(Debug, Clone, Default)]
pub struct RunLogger {
    entries: Arc<Mutex<RunLogEntries>>,
}

impl RunLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunLogEntries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an informational line.
    pub fn log(&self, message: impl Into<String>) {
        let entry = json!({
            "type": "log",
            "at": Timestamp::now().to_string(),
            "message": message.into(),
        });
        self.lock().logs.push(entry);
    }

    /// Records an error at the current time.
    pub fn error(&self, error: &Error) {
        self.error_at(error, Timestamp::now());
    }

    /// Records an error with an explicit timestamp.
    pub fn error_at(&self, error: &Error, at: Timestamp) {
        let entry = json!({
            "type": "error",
            "at": at.to_string(),
            "kind": error.kind_str(),
            "message": error.message_or_kind(),
        });
        self.lock().errors.push(entry);
    }

    /// Returns the number of recorded errors.
    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    /// Returns a copy of every entry recorded so far.
    pub fn snapshot(&self) -> RunLogEntries {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let logger = RunLogger::new();
        let handle = logger.clone();

        handle.log("Report started");
        logger.error(&Error::internal("boom"));

        let entries = logger.snapshot();
        assert_eq!(entries.logs.len(), 1);
        assert_eq!(entries.logs[0]["message"], "Report started");
        assert_eq!(entries.errors[0]["kind"], "internal");
        assert_eq!(entries.errors[0]["message"], "boom");
        assert_eq!(handle.error_count(), 1);
    }

    #[test]
    fn test_error_at_uses_given_time() {
        let logger = RunLogger::new();
        let at: Timestamp = "2024-05-01T10:00:00Z".parse().unwrap();

        logger.error_at(&Error::cancelled(), at);
        assert_eq!(logger.snapshot().errors[0]["at"], "2024-05-01T10:00:00Z");
    }
}
