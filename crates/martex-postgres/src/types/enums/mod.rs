//! Database enumeration types for type-safe queries.
//!
//! Each enumeration corresponds to a PostgreSQL ENUM type defined in the
//! migrations and maps to it through Diesel.

// Report-related enumerations
pub mod report_run_status;
pub mod run_type;

// Catalogue enumerations
pub mod credential_scope;
pub mod credential_type;
pub mod destination_type;
pub mod storage_type;

pub use credential_scope::CredentialScope;
pub use credential_type::CredentialType;
pub use destination_type::DestinationType;
pub use report_run_status::ReportRunStatus;
pub use run_type::RunType;
pub use storage_type::StorageType;
