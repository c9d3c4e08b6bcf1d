//! Data mart model for PostgreSQL database operations.

use diesel::prelude::*;
use jiff_diesel::Timestamp;
use uuid::Uuid;

use crate::schema::data_marts;

/// Queryable virtual dataset defined on top of a storage.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = data_marts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DataMart {
    /// Unique data mart identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Storage the data mart reads from.
    pub storage_id: Uuid,
    /// Display title.
    pub title: String,
    /// Dataset definition (SQL query, table, view or table pattern).
    pub definition: Option<serde_json::Value>,
    /// When the data mart was created.
    pub created_at: Timestamp,
    /// When the data mart was last updated.
    pub updated_at: Timestamp,
}
