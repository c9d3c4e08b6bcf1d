//! Database models for all tables.
//!
//! Each table has a queryable model plus `New*` (insert) and `Update*`
//! (changeset) companions where the crate writes to it.

mod credential;
mod data_destination;
mod data_mart;
mod data_storage;
mod report;
mod report_run;

pub use credential::{Credential, UpdateCredential};
pub use data_destination::DataDestination;
pub use data_mart::DataMart;
pub use data_storage::DataStorage;
pub use report::{Report, ReportContext, UpdateReport};
pub use report_run::{NewReportRun, ReportRun, UpdateReportRun};
