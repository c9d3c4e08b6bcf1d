//! Report run state machine.
//!
//! ```text
//! IDLE ──► RUNNING ──► SUCCESS | ERROR | CANCELLED | RESTRICTED
//!            ▲                          │
//!            └──────────────────────────┘
//! ```
//!
//! Transitions are in-memory; the caller persists them. The start transition
//! goes through a version-checked write, the terminal one through a write
//! matched on the `RUNNING` status.

use jiff::Timestamp;
use martex_postgres::model::{Report, ReportRun, UpdateReport, UpdateReportRun};
use martex_postgres::types::ReportRunStatus;
use serde_json::Value;

use super::RunLogger;
use crate::{Error, ErrorKind, Result};

/// Returns whether a new run of `report` may start.
pub fn can_start(report: &Report) -> bool {
    !report.is_running()
}

/// Moves `report` to `RUNNING`.
///
/// Records the start time, increments the run counter and clears the previous
/// error. The version is left untouched: it is the expected version of the
/// write that persists this change.
pub fn prepare_for_start(report: &mut Report, now: Timestamp) -> Result<()> {
    if !can_start(report) {
        return Err(Error::new(ErrorKind::AlreadyRunning)
            .with_message(format!("Report {} is already running", report.id)));
    }

    report.last_run_status = ReportRunStatus::Running;
    report.last_run_at = Some(now.into());
    report.runs_count += 1;
    report.last_run_error = None;
    Ok(())
}

/// A started run and its report, waiting for a terminal transition.
#[derive(Debug, Clone)]
pub struct ReportRunState {
    report: Report,
    run: ReportRun,
    logger: RunLogger,
}

impl ReportRunState {
    /// Wraps a report and run persisted in the `RUNNING` state.
    pub fn new(report: Report, run: ReportRun, logger: RunLogger) -> Self {
        Self {
            report,
            run,
            logger,
        }
    }

    /// Returns the report.
    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Returns the run record.
    pub fn run(&self) -> &ReportRun {
        &self.run
    }

    /// Returns the logger of the run.
    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    /// Returns the current status.
    pub fn status(&self) -> ReportRunStatus {
        self.run.status
    }

    /// Marks the run as successful.
    pub fn mark_as_success(&mut self, now: Timestamp) {
        self.finish(ReportRunStatus::Success, None, now);
    }

    /// Marks the run as failed.
    ///
    /// Business violations end as `RESTRICTED`, every other error as `ERROR`.
    /// The message becomes the report's latest error and is appended to the
    /// run's error history.
    pub fn mark_as_unsuccessful(&mut self, error: &Error, now: Timestamp) {
        let status = if error.is_business_violation() {
            ReportRunStatus::Restricted
        } else {
            ReportRunStatus::Error
        };

        self.logger.error_at(error, now);
        self.finish(status, Some(error.message_or_kind()), now);
    }

    /// Marks the run as cancelled.
    pub fn mark_as_cancelled(&mut self, now: Timestamp) {
        let error = Error::cancelled();
        self.logger.error_at(&error, now);
        self.finish(ReportRunStatus::Cancelled, Some(error.message_or_kind()), now);
    }

    fn finish(&mut self, status: ReportRunStatus, error: Option<String>, now: Timestamp) {
        debug_assert!(self.run.status.is_running(), "run already finished");

        self.report.last_run_status = status;
        self.report.last_run_error = error;
        self.run.status = status;
        self.run.finished_at = Some(now.into());
    }

    /// Returns the report bookkeeping to persist.
    pub fn report_changes(&self) -> UpdateReport {
        self.report.run_changes()
    }

    /// Returns the run record changes to persist.
    ///
    /// Errors collected by the logger are appended to the stored history.
    pub fn run_changes(&self) -> UpdateReportRun {
        let entries = self.logger.snapshot();

        let mut errors = match &self.run.errors {
            Value::Array(errors) => errors.clone(),
            _ => Vec::new(),
        };
        errors.extend(entries.errors);

        UpdateReportRun {
            status: Some(self.run.status),
            errors: Some(Value::Array(errors)),
            logs: Some(Value::Array(entries.logs)),
            finished_at: Some(self.run.finished_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use martex_postgres::types::{DestinationType, StorageType};
    use serde_json::json;

    use super::*;
    use crate::mock::{MemoryReportStore, running_run};

    fn report() -> Report {
        MemoryReportStore::new()
            .seed_report(StorageType::GoogleBigQuery, DestinationType::GoogleSheets)
            .report
    }

    #[test]
    fn test_prepare_for_start() {
        let mut report = report();
        report.last_run_error = Some("previous failure".into());
        let version = report.version;
        let now = Timestamp::now();

        prepare_for_start(&mut report, now).unwrap();

        assert_eq!(report.last_run_status, ReportRunStatus::Running);
        assert_eq!(report.runs_count, 1);
        assert_eq!(report.last_run_error, None);
        assert_eq!(report.last_run_at.map(Timestamp::from), Some(now));
        assert_eq!(report.version, version);
        assert!(!can_start(&report));
    }

    #[test]
    fn test_prepare_for_start_rejects_running_report() {
        let mut report = report();
        report.last_run_status = ReportRunStatus::Running;
        let before = report.clone();

        let error = prepare_for_start(&mut report, Timestamp::now()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::AlreadyRunning);
        assert_eq!(report, before);
    }

    #[test]
    fn test_terminal_reports_can_restart() {
        let mut report = report();
        for status in [
            ReportRunStatus::Success,
            ReportRunStatus::Error,
            ReportRunStatus::Cancelled,
            ReportRunStatus::Restricted,
        ] {
            report.last_run_status = status;
            assert!(can_start(&report));
        }
    }

    fn started() -> ReportRunState {
        let mut report = report();
        prepare_for_start(&mut report, Timestamp::now()).unwrap();
        let run = running_run(report.id);
        ReportRunState::new(report, run, RunLogger::new())
    }

    #[test]
    fn test_mark_as_success() {
        let mut state = started();
        state.mark_as_success(Timestamp::now());

        assert_eq!(state.status(), ReportRunStatus::Success);
        assert_eq!(state.report().last_run_status, ReportRunStatus::Success);
        assert!(state.run().finished_at.is_some());
        assert_eq!(state.run_changes().errors, Some(json!([])));
    }

    #[test]
    fn test_business_violation_is_restricted() {
        let mut state = started();
        state.mark_as_unsuccessful(&Error::business_violation("Billing blocked"), Timestamp::now());

        assert_eq!(state.status(), ReportRunStatus::Restricted);
        assert_eq!(state.report().last_run_error.as_deref(), Some("Billing blocked"));
    }

    #[test]
    fn test_unexpected_error_appends_history() {
        let mut state = started();
        state.run.errors = json!([{ "at": "2024-01-01T00:00:00Z", "message": "older" }]);

        state.mark_as_unsuccessful(&Error::internal("Upstream exploded"), Timestamp::now());

        assert_eq!(state.status(), ReportRunStatus::Error);
        let changes = state.run_changes();
        let errors = changes.errors.unwrap();
        assert_eq!(errors.as_array().unwrap().len(), 2);
        assert_eq!(errors[0]["message"], "older");
        assert_eq!(errors[1]["message"], "Upstream exploded");
        assert_eq!(
            state.report_changes().last_run_error,
            Some(Some("Upstream exploded".into()))
        );
    }

    #[test]
    fn test_mark_as_cancelled() {
        let mut state = started();
        state.mark_as_cancelled(Timestamp::now());

        assert_eq!(state.status(), ReportRunStatus::Cancelled);
        assert_eq!(
            state.report().last_run_error.as_deref(),
            Some("Report run was cancelled")
        );
    }
}
