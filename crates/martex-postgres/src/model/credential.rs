//! Credential model for PostgreSQL database operations.

use diesel::prelude::*;
use jiff_diesel::Timestamp;
use uuid::Uuid;

use crate::schema::credentials;
use crate::types::{CredentialScope, CredentialType};

/// Stored secret used to authenticate against a storage or destination.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = credentials)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Credential {
    /// Unique credential identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Storage or destination side.
    pub scope: CredentialScope,
    /// Authentication scheme of the secret.
    pub credential_type: CredentialType,
    /// Secret blob (token pair, service account key, API key).
    pub secret: serde_json::Value,
    /// Display identity: email address.
    pub identity_email: Option<String>,
    /// Display identity: user name.
    pub identity_username: Option<String>,
    /// When the current access token expires.
    pub expires_at: Option<Timestamp>,
    /// Account that connected the credential.
    pub created_by: Option<Uuid>,
    /// When the credential was created.
    pub created_at: Timestamp,
    /// When the credential was last updated.
    pub updated_at: Timestamp,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<Timestamp>,
}

/// Data for updating a credential.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = credentials)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UpdateCredential {
    /// Secret blob.
    pub secret: Option<serde_json::Value>,
    /// Access token expiry.
    pub expires_at: Option<Option<Timestamp>>,
    /// Display identity: email address.
    pub identity_email: Option<Option<String>>,
    /// Display identity: user name.
    pub identity_username: Option<Option<String>>,
}

impl Credential {
    /// Returns whether the credential has been revoked.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the access token expiry as a [`jiff::Timestamp`].
    pub fn expiry(&self) -> Option<jiff::Timestamp> {
        self.expires_at.map(Into::into)
    }
}
