//! Data destination type enumeration.

use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Kind of external system a report is exported to.
///
/// This enumeration corresponds to the `DESTINATION_TYPE` PostgreSQL enum.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, DbEnum, Display, EnumIter, EnumString)]
#[ExistingTypePath = "crate::schema::sql_types::DestinationType"]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationType {
    /// Google Sheets spreadsheet.
    #[db_rename = "GOOGLE_SHEETS"]
    #[serde(rename = "GOOGLE_SHEETS")]
    GoogleSheets,

    /// Looker Studio connector.
    #[db_rename = "LOOKER_STUDIO"]
    #[serde(rename = "LOOKER_STUDIO")]
    LookerStudio,

    /// Email delivery.
    #[db_rename = "EMAIL"]
    #[serde(rename = "EMAIL")]
    Email,

    /// Slack channel.
    #[db_rename = "SLACK"]
    #[serde(rename = "SLACK")]
    Slack,

    /// Microsoft Teams channel.
    #[db_rename = "MS_TEAMS"]
    #[serde(rename = "MS_TEAMS")]
    MsTeams,

    /// Google Chat space.
    #[db_rename = "GOOGLE_CHAT"]
    #[serde(rename = "GOOGLE_CHAT")]
    GoogleChat,
}

impl DestinationType {
    /// Returns whether the destination is a messaging channel.
    #[inline]
    pub fn is_messaging(self) -> bool {
        matches!(
            self,
            DestinationType::Email
                | DestinationType::Slack
                | DestinationType::MsTeams
                | DestinationType::GoogleChat
        )
    }
}
