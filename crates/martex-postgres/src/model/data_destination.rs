//! Data destination model for PostgreSQL database operations.

use diesel::prelude::*;
use jiff_diesel::Timestamp;
use uuid::Uuid;

use crate::schema::data_destinations;
use crate::types::DestinationType;

/// External system reports are exported to.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = data_destinations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DataDestination {
    /// Unique destination identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Destination kind, selects the report writer.
    pub destination_type: DestinationType,
    /// Display title.
    pub title: String,
    /// Destination-specific configuration shared by its reports.
    pub config: serde_json::Value,
    /// Credential used to authenticate, if connected.
    pub credential_id: Option<Uuid>,
    /// When the destination was created.
    pub created_at: Timestamp,
    /// When the destination was last updated.
    pub updated_at: Timestamp,
}
