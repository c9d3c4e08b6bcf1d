//! Data storage model for PostgreSQL database operations.

use diesel::prelude::*;
use jiff_diesel::Timestamp;
use uuid::Uuid;

use crate::schema::data_storages;
use crate::types::StorageType;

/// Warehouse connection a data mart reads from.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = data_storages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DataStorage {
    /// Unique storage identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Warehouse kind, selects the report reader.
    pub storage_type: StorageType,
    /// Display title.
    pub title: String,
    /// Storage-specific configuration (project id, location, ...).
    pub config: serde_json::Value,
    /// Credential used to authenticate, if connected.
    pub credential_id: Option<Uuid>,
    /// When the storage was created.
    pub created_at: Timestamp,
    /// When the storage was last updated.
    pub updated_at: Timestamp,
}
