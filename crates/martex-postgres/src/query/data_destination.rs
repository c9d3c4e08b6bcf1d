//! Data destination repository.

use std::future::Future;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::{PgConnection, PgError, PgResult, schema};

/// Repository for data destination database operations.
pub trait DataDestinationRepository {
    /// Clears the credential reference of every destination using `credential_id`.
    fn detach_data_destination_credential(
        &mut self,
        credential_id: Uuid,
    ) -> impl Future<Output = PgResult<usize>> + Send;
}

impl DataDestinationRepository for PgConnection {
    async fn detach_data_destination_credential(&mut self, credential_id: Uuid) -> PgResult<usize> {
        use diesel::dsl::now;
        use schema::data_destinations::{self, dsl};

        diesel::update(data_destinations::table.filter(dsl::credential_id.eq(credential_id)))
            .set((
                dsl::credential_id.eq(None::<Uuid>),
                dsl::updated_at.eq(now),
            ))
            .execute(self)
            .await
            .map_err(PgError::from)
    }
}
