//! Credential persistence used by the token flows.

use diesel_async::scoped_futures::ScopedFutureExt;
use jiff::Timestamp;
use martex_postgres::model::{Credential, UpdateCredential};
use martex_postgres::query::{
    CredentialRepository, DataDestinationRepository, DataStorageRepository,
};
use martex_postgres::types::{CredentialScope, CredentialType};
use martex_postgres::{PgClient, PgError};
use uuid::Uuid;

use crate::{Error, ErrorKind, Result, TRACING_TARGET_FLOW};

/// A credential as seen by the token flows.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    /// Credential identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Storage or destination side, selects the OAuth application.
    pub scope: CredentialScope,
    /// Authentication scheme of the secret.
    pub credential_type: CredentialType,
    /// Secret blob.
    pub secret: serde_json::Value,
    /// Display identity: email address.
    pub identity_email: Option<String>,
    /// Display identity: user name.
    pub identity_username: Option<String>,
    /// When the current access token expires.
    pub expires_at: Option<Timestamp>,
}

impl From<Credential> for StoredCredential {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id,
            project_id: credential.project_id,
            scope: credential.scope,
            credential_type: credential.credential_type,
            secret: credential.secret,
            identity_email: credential.identity_email,
            identity_username: credential.identity_username,
            expires_at: credential.expires_at.map(Into::into),
        }
    }
}

/// New secret and expiry produced by a rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialUpdate {
    /// Secret to store.
    pub secret: serde_json::Value,
    /// New access token expiry.
    pub expires_at: Option<Timestamp>,
}

impl CredentialUpdate {
    /// Applies the update to an in-memory credential.
    pub fn apply(self, credential: &mut StoredCredential) {
        credential.secret = self.secret;
        credential.expires_at = self.expires_at;
    }
}

/// A token rotation performed while the credential is held exclusively.
#[async_trait::async_trait]
pub trait TokenRotation: Send + Sync {
    /// Returns whether `credential` still needs rotating.
    ///
    /// Evaluated after the credential is locked, so a rotation finished by
    /// another holder in the meantime is observed.
    fn is_due(&self, credential: &StoredCredential) -> bool;

    /// Obtains the new secret from the authorization server.
    async fn rotate(&self, credential: &StoredCredential) -> Result<CredentialUpdate>;
}

/// Persistence of credentials for refresh and revocation.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads a credential that has not been revoked.
    async fn find_credential(&self, credential_id: Uuid) -> Result<Option<StoredCredential>>;

    /// Holds the credential exclusively, re-checks [`TokenRotation::is_due`]
    /// and stores the rotated secret.
    ///
    /// Returns the credential as stored afterwards. Fails with
    /// `CredentialsNotFound` if the credential is missing or revoked.
    async fn rotate_credential(
        &self,
        credential_id: Uuid,
        rotation: &dyn TokenRotation,
    ) -> Result<StoredCredential>;

    /// Soft-deletes the credential and detaches it from storages and destinations.
    async fn revoke_credential(&self, credential_id: Uuid) -> Result<()>;
}

pub(crate) fn credentials_not_found(credential_id: Uuid) -> Error {
    Error::new(ErrorKind::CredentialsNotFound)
        .with_message(format!("Credentials {credential_id} not found"))
}

/// Failure inside the rotation transaction.
#[derive(Debug, thiserror::Error)]
enum RotateError {
    #[error(transparent)]
    Database(#[from] PgError),
    #[error(transparent)]
    Rotation(#[from] Error),
}

impl From<diesel::result::Error> for RotateError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Database(PgError::from(error))
    }
}

impl From<RotateError> for Error {
    fn from(error: RotateError) -> Self {
        match error {
            RotateError::Database(error) => error.into(),
            RotateError::Rotation(error) => error,
        }
    }
}

/// [`CredentialStore`] backed by Postgres.
///
/// Rotation runs inside a transaction holding `SELECT .. FOR UPDATE` on the
/// credential row. Another process that refreshed first is observed by the
/// re-check and no upstream call is made.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pg_client: PgClient,
}

impl PgCredentialStore {
    /// Creates a store on top of the given client.
    pub fn new(pg_client: PgClient) -> Self {
        Self { pg_client }
    }
}

#[async_trait::async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_credential(&self, credential_id: Uuid) -> Result<Option<StoredCredential>> {
        let mut conn = self.pg_client.get_connection().await?;
        let credential = conn.find_credential_by_id(credential_id).await?;
        Ok(credential.map(StoredCredential::from))
    }

    async fn rotate_credential(
        &self,
        credential_id: Uuid,
        rotation: &dyn TokenRotation,
    ) -> Result<StoredCredential> {
        let mut conn = self.pg_client.get_connection().await?;

        let credential = conn
            .transaction::<_, RotateError, _>(|conn| {
                async move {
                    let Some(locked) = conn.find_credential_for_update(credential_id).await? else {
                        return Err(credentials_not_found(credential_id).into());
                    };

                    let locked = StoredCredential::from(locked);
                    if !rotation.is_due(&locked) {
                        tracing::debug!(
                            target: TRACING_TARGET_FLOW,
                            credential_id = %credential_id,
                            "Credential was already refreshed by another holder"
                        );
                        return Ok(locked);
                    }

                    let update = rotation.rotate(&locked).await?;
                    let changes = UpdateCredential {
                        secret: Some(update.secret),
                        expires_at: Some(update.expires_at.map(Into::into)),
                        ..Default::default()
                    };

                    let stored = conn.update_credential_tokens(credential_id, changes).await?;
                    Ok(StoredCredential::from(stored))
                }
                .scope_boxed()
            })
            .await?;

        Ok(credential)
    }

    async fn revoke_credential(&self, credential_id: Uuid) -> Result<()> {
        let mut conn = self.pg_client.get_connection().await?;

        conn.transaction::<_, PgError, _>(|conn| {
            async move {
                let storages = conn.detach_data_storage_credential(credential_id).await?;
                let destinations = conn.detach_data_destination_credential(credential_id).await?;
                let deleted = conn.soft_delete_credential(credential_id).await?;

                tracing::info!(
                    target: TRACING_TARGET_FLOW,
                    credential_id = %credential_id,
                    storages,
                    destinations,
                    deleted,
                    "Credential revoked"
                );
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        Ok(())
    }
}
