//! Credential type enumeration.

use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Authentication scheme of a stored credential secret.
///
/// This enumeration corresponds to the `CREDENTIAL_TYPE` PostgreSQL enum.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, DbEnum, Display, EnumIter, EnumString)]
#[ExistingTypePath = "crate::schema::sql_types::CredentialType"]
#[strum(serialize_all = "snake_case")]
pub enum CredentialType {
    /// OAuth 2.0 token pair issued by Google.
    #[db_rename = "google_oauth"]
    #[serde(rename = "google_oauth")]
    GoogleOAuth,

    /// Google service account key.
    #[db_rename = "google_service_account"]
    #[serde(rename = "google_service_account")]
    GoogleServiceAccount,

    /// Static API key.
    #[db_rename = "api_key"]
    #[serde(rename = "api_key")]
    ApiKey,

    /// Incoming webhook URL.
    #[db_rename = "webhook"]
    #[serde(rename = "webhook")]
    Webhook,
}

impl CredentialType {
    /// Returns whether the secret holds a refreshable OAuth token pair.
    #[inline]
    pub fn is_oauth(self) -> bool {
        matches!(self, CredentialType::GoogleOAuth)
    }
}
