//! Credential repository.

use std::future::Future;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::model::{Credential, UpdateCredential};
use crate::{PgConnection, PgError, PgResult, TRACING_TARGET_QUERY, schema};

/// Repository for credential database operations.
///
/// Soft-deleted credentials are invisible to every lookup.
pub trait CredentialRepository {
    /// Finds a non-deleted credential by its ID.
    fn find_credential_by_id(
        &mut self,
        credential_id: Uuid,
    ) -> impl Future<Output = PgResult<Option<Credential>>> + Send;

    /// Finds a non-deleted credential and locks its row until the transaction ends.
    ///
    /// Must be called inside a transaction.
    fn find_credential_for_update(
        &mut self,
        credential_id: Uuid,
    ) -> impl Future<Output = PgResult<Option<Credential>>> + Send;

    /// Writes a rotated secret and its new expiry.
    fn update_credential_tokens(
        &mut self,
        credential_id: Uuid,
        updates: UpdateCredential,
    ) -> impl Future<Output = PgResult<Credential>> + Send;

    /// Marks a credential as deleted. Returns whether a row changed.
    fn soft_delete_credential(
        &mut self,
        credential_id: Uuid,
    ) -> impl Future<Output = PgResult<bool>> + Send;
}

impl CredentialRepository for PgConnection {
    async fn find_credential_by_id(&mut self, credential_id: Uuid) -> PgResult<Option<Credential>> {
        use schema::credentials::{self, dsl};

        credentials::table
            .filter(dsl::id.eq(credential_id))
            .filter(dsl::deleted_at.is_null())
            .select(Credential::as_select())
            .first(self)
            .await
            .optional()
            .map_err(PgError::from)
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_QUERY)]
    async fn find_credential_for_update(
        &mut self,
        credential_id: Uuid,
    ) -> PgResult<Option<Credential>> {
        use schema::credentials::{self, dsl};

        credentials::table
            .filter(dsl::id.eq(credential_id))
            .filter(dsl::deleted_at.is_null())
            .select(Credential::as_select())
            .for_update()
            .first(self)
            .await
            .optional()
            .map_err(PgError::from)
    }

    #[tracing::instrument(skip(self, updates), target = TRACING_TARGET_QUERY)]
    async fn update_credential_tokens(
        &mut self,
        credential_id: Uuid,
        updates: UpdateCredential,
    ) -> PgResult<Credential> {
        use diesel::dsl::now;
        use schema::credentials::{self, dsl};

        diesel::update(
            credentials::table
                .filter(dsl::id.eq(credential_id))
                .filter(dsl::deleted_at.is_null()),
        )
        .set((&updates, dsl::updated_at.eq(now)))
        .returning(Credential::as_returning())
        .get_result(self)
        .await
        .map_err(PgError::from)
    }

    async fn soft_delete_credential(&mut self, credential_id: Uuid) -> PgResult<bool> {
        use diesel::dsl::now;
        use schema::credentials::{self, dsl};

        let rows_affected = diesel::update(
            credentials::table
                .filter(dsl::id.eq(credential_id))
                .filter(dsl::deleted_at.is_null()),
        )
        .set(dsl::deleted_at.eq(now))
        .execute(self)
        .await
        .map_err(PgError::from)?;

        Ok(rows_affected > 0)
    }
}
