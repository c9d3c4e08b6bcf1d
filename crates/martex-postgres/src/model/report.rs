//! Report model for PostgreSQL database operations.

use diesel::prelude::*;
use jiff_diesel::Timestamp;
use uuid::Uuid;

use super::{DataDestination, DataMart, DataStorage};
use crate::schema::reports;
use crate::types::ReportRunStatus;

/// Configured export of a data mart to a destination.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = reports)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Report {
    /// Unique report identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Data mart being exported.
    pub data_mart_id: Uuid,
    /// Destination receiving the export.
    pub destination_id: Uuid,
    /// Display title.
    pub title: String,
    /// Destination-specific configuration (spreadsheet id, channel, ...).
    pub destination_config: serde_json::Value,
    /// Status of the most recent run.
    pub last_run_status: ReportRunStatus,
    /// When the most recent run started.
    pub last_run_at: Option<Timestamp>,
    /// Error message of the most recent run.
    pub last_run_error: Option<String>,
    /// Number of runs started.
    pub runs_count: i32,
    /// Optimistic-lock counter, incremented on every write.
    pub version: i32,
    /// Account that created the report.
    pub created_by: Option<Uuid>,
    /// When the report was created.
    pub created_at: Timestamp,
    /// When the report was last updated.
    pub updated_at: Timestamp,
}

/// Run bookkeeping written by the run state machine.
///
/// The `version` column is not part of the changeset; the repository writes
/// increment it. The start transition matches on it in
/// [`ReportRepository::update_report_versioned`].
///
/// [`ReportRepository::update_report_versioned`]: crate::query::ReportRepository::update_report_versioned
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = reports)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UpdateReport {
    /// Status of the most recent run.
    pub last_run_status: Option<ReportRunStatus>,
    /// When the most recent run started.
    pub last_run_at: Option<Option<Timestamp>>,
    /// Error message of the most recent run.
    pub last_run_error: Option<Option<String>>,
    /// Number of runs started.
    pub runs_count: Option<i32>,
}

impl Report {
    /// Returns whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.last_run_status.is_running()
    }

    /// Returns the bookkeeping columns as a full changeset.
    pub fn run_changes(&self) -> UpdateReport {
        UpdateReport {
            last_run_status: Some(self.last_run_status),
            last_run_at: Some(self.last_run_at),
            last_run_error: Some(self.last_run_error.clone()),
            runs_count: Some(self.runs_count),
        }
    }
}

/// A report loaded together with everything needed to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportContext {
    /// The report itself.
    pub report: Report,
    /// Data mart being exported.
    pub data_mart: DataMart,
    /// Storage the data mart reads from.
    pub storage: DataStorage,
    /// Destination receiving the export.
    pub destination: DataDestination,
}
