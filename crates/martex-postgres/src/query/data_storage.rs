//! Data storage repository.

use std::future::Future;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::{PgConnection, PgError, PgResult, schema};

/// Repository for data storage database operations.
pub trait DataStorageRepository {
    /// Clears the credential reference of every storage using `credential_id`.
    ///
    /// Returns the number of storages detached.
    fn detach_data_storage_credential(
        &mut self,
        credential_id: Uuid,
    ) -> impl Future<Output = PgResult<usize>> + Send;
}

impl DataStorageRepository for PgConnection {
    async fn detach_data_storage_credential(&mut self, credential_id: Uuid) -> PgResult<usize> {
        use diesel::dsl::now;
        use schema::data_storages::{self, dsl};

        diesel::update(data_storages::table.filter(dsl::credential_id.eq(credential_id)))
            .set((
                dsl::credential_id.eq(None::<Uuid>),
                dsl::updated_at.eq(now),
            ))
            .execute(self)
            .await
            .map_err(PgError::from)
    }
}
