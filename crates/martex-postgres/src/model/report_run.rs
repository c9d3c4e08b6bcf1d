//! Report run model for PostgreSQL database operations.

use diesel::prelude::*;
use jiff_diesel::Timestamp;
use uuid::Uuid;

use crate::schema::report_runs;
use crate::types::{ReportRunStatus, RunType};

/// One execution attempt of a report.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = report_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReportRun {
    /// Unique run identifier.
    pub id: Uuid,
    /// Report being executed.
    pub report_id: Uuid,
    /// Current execution status.
    pub status: ReportRunStatus,
    /// How the run was initiated.
    pub run_type: RunType,
    /// Account that started the run.
    pub created_by: Option<Uuid>,
    /// Append-only list of `{ "at": .., "message": .. }` entries.
    pub errors: serde_json::Value,
    /// Structured log lines collected during the run.
    pub logs: serde_json::Value,
    /// When execution started.
    pub started_at: Option<Timestamp>,
    /// When execution reached a terminal status.
    pub finished_at: Option<Timestamp>,
    /// When the run was created.
    pub created_at: Timestamp,
}

/// Data for creating a new report run.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = report_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewReportRun {
    /// Report being executed.
    pub report_id: Uuid,
    /// Initial status.
    pub status: ReportRunStatus,
    /// How the run was initiated.
    pub run_type: RunType,
    /// Account that started the run.
    pub created_by: Option<Uuid>,
    /// When execution started.
    pub started_at: Option<Timestamp>,
}

/// Data for updating a report run.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = report_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UpdateReportRun {
    /// Execution status.
    pub status: Option<ReportRunStatus>,
    /// Full error history.
    pub errors: Option<serde_json::Value>,
    /// Collected log lines.
    pub logs: Option<serde_json::Value>,
    /// When execution reached a terminal status.
    pub finished_at: Option<Option<Timestamp>>,
}

impl ReportRun {
    /// Returns the number of recorded errors.
    pub fn error_count(&self) -> usize {
        self.errors.as_array().map_or(0, Vec::len)
    }

    /// Returns the message of the most recent error, if any.
    pub fn last_error_message(&self) -> Option<&str> {
        self.errors
            .as_array()?
            .last()?
            .get("message")?
            .as_str()
    }

    /// Returns the duration of the run in seconds, if available.
    pub fn duration_seconds(&self) -> Option<f64> {
        let started: jiff::Timestamp = self.started_at?.into();
        let finished: jiff::Timestamp = self.finished_at?.into();
        Some(finished.duration_since(started).as_secs_f64())
    }
}
