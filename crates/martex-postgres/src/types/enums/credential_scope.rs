//! Credential scope enumeration.

use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Which side of an export a credential authenticates.
///
/// Storages and destinations use separate OAuth applications, so the scope
/// selects the client identifier used to refresh the token.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, DbEnum, Display, EnumIter, EnumString)]
#[ExistingTypePath = "crate::schema::sql_types::CredentialScope"]
#[strum(serialize_all = "snake_case")]
pub enum CredentialScope {
    /// Authenticates a data storage (reader side).
    #[db_rename = "storage"]
    #[serde(rename = "storage")]
    Storage,

    /// Authenticates a data destination (writer side).
    #[db_rename = "destination"]
    #[serde(rename = "destination")]
    Destination,
}
