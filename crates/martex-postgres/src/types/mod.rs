//! Contains enumerations and other custom types.

mod enums;

pub use enums::{
    CredentialScope, CredentialType, DestinationType, ReportRunStatus, RunType, StorageType,
};
