//! Data storage type enumeration.

use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Kind of warehouse a data mart reads from.
///
/// This enumeration corresponds to the `STORAGE_TYPE` PostgreSQL enum.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, DbEnum, Display, EnumIter, EnumString)]
#[ExistingTypePath = "crate::schema::sql_types::StorageType"]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageType {
    /// Google BigQuery.
    #[db_rename = "GOOGLE_BIGQUERY"]
    #[serde(rename = "GOOGLE_BIGQUERY")]
    #[strum(serialize = "GOOGLE_BIGQUERY")]
    GoogleBigQuery,

    /// Amazon Athena.
    #[db_rename = "AWS_ATHENA"]
    #[serde(rename = "AWS_ATHENA")]
    AwsAthena,

    /// Snowflake.
    #[db_rename = "SNOWFLAKE"]
    #[serde(rename = "SNOWFLAKE")]
    Snowflake,

    /// Amazon Redshift.
    #[db_rename = "AWS_REDSHIFT"]
    #[serde(rename = "AWS_REDSHIFT")]
    AwsRedshift,

    /// Databricks SQL.
    #[db_rename = "DATABRICKS"]
    #[serde(rename = "DATABRICKS")]
    Databricks,
}
