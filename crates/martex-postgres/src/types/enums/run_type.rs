//! Run type enumeration indicating how a report run was initiated.

use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Defines how a report run was initiated.
///
/// This enumeration corresponds to the `RUN_TYPE` PostgreSQL enum.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
#[derive(Serialize, Deserialize, DbEnum, Display, EnumIter, EnumString)]
#[ExistingTypePath = "crate::schema::sql_types::RunType"]
#[strum(serialize_all = "snake_case")]
pub enum RunType {
    /// Started by a user.
    #[db_rename = "manual"]
    #[serde(rename = "manual")]
    #[default]
    Manual,

    /// Started by a scheduled trigger.
    #[db_rename = "scheduled"]
    #[serde(rename = "scheduled")]
    Scheduled,
}

impl RunType {
    /// Returns whether the run was started by a user.
    #[inline]
    pub fn is_manual(self) -> bool {
        matches!(self, RunType::Manual)
    }
}
