//! Report run status enumeration shared by reports and their runs.

use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Lifecycle status of a report run.
///
/// This enumeration corresponds to the `REPORT_RUN_STATUS` PostgreSQL enum. The
/// same values are used for `reports.last_run_status` and `report_runs.status`,
/// and are the stable wire values exposed to clients.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, DbEnum, Display, EnumIter, EnumString)]
#[ExistingTypePath = "crate::schema::sql_types::ReportRunStatus"]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportRunStatus {
    /// The report has never run.
    #[db_rename = "IDLE"]
    #[serde(rename = "IDLE")]
    #[default]
    Idle,

    /// A run is in progress.
    #[db_rename = "RUNNING"]
    #[serde(rename = "RUNNING")]
    Running,

    /// The last run transferred every batch.
    #[db_rename = "SUCCESS"]
    #[serde(rename = "SUCCESS")]
    Success,

    /// The last run failed.
    #[db_rename = "ERROR"]
    #[serde(rename = "ERROR")]
    Error,

    /// The last run observed a cancellation signal.
    #[db_rename = "CANCELLED"]
    #[serde(rename = "CANCELLED")]
    Cancelled,

    /// The last run was vetoed by a policy check.
    #[db_rename = "RESTRICTED"]
    #[serde(rename = "RESTRICTED")]
    Restricted,
}

impl ReportRunStatus {
    /// Returns whether a run is in progress.
    #[inline]
    pub fn is_running(self) -> bool {
        matches!(self, ReportRunStatus::Running)
    }

    /// Returns whether the status is one of the terminal outcomes.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReportRunStatus::Success
                | ReportRunStatus::Error
                | ReportRunStatus::Cancelled
                | ReportRunStatus::Restricted
        )
    }

    /// Returns whether the run ended without transferring its data.
    #[inline]
    pub fn is_unsuccessful(self) -> bool {
        matches!(
            self,
            ReportRunStatus::Error | ReportRunStatus::Cancelled | ReportRunStatus::Restricted
        )
    }
}
