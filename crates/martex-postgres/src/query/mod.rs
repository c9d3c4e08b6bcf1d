//! Repositories for every table, implemented on [`PgConnection`].
//!
//! [`PgConnection`]: crate::PgConnection

mod credential;
mod data_destination;
mod data_storage;
mod report;
mod report_run;

pub use credential::CredentialRepository;
pub use data_destination::DataDestinationRepository;
pub use data_storage::DataStorageRepository;
pub use report::ReportRepository;
pub use report_run::ReportRunRepository;
