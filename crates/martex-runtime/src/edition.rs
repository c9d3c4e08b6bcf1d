//! Product editions and the destination types they unlock.

use martex_postgres::types::DestinationType;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoEnumIterator};

use crate::{Error, Result};

/// Product edition the process runs as.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Edition {
    /// Free edition.
    #[default]
    Community,
    /// Paid edition with messaging destinations.
    Enterprise,
}

impl Edition {
    /// Returns whether this is the enterprise edition.
    #[inline]
    pub fn is_enterprise(self) -> bool {
        matches!(self, Edition::Enterprise)
    }
}

/// Destination types a report may export to in the current edition.
///
/// Spreadsheet and dashboard destinations are available everywhere; messaging
/// destinations (email, Slack, Teams, Google Chat) need the enterprise edition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailableDestinationTypes {
    edition: Edition,
}

impl AvailableDestinationTypes {
    /// Creates the availability rules for `edition`.
    pub fn for_edition(edition: Edition) -> Self {
        Self { edition }
    }

    /// Returns the edition the rules apply to.
    pub fn edition(&self) -> Edition {
        self.edition
    }

    /// Returns whether `destination_type` may be used.
    pub fn is_available(&self, destination_type: DestinationType) -> bool {
        !destination_type.is_messaging() || self.edition.is_enterprise()
    }

    /// Returns every available destination type.
    pub fn available(&self) -> Vec<DestinationType> {
        DestinationType::iter()
            .filter(|destination_type| self.is_available(*destination_type))
            .collect()
    }

    /// Fails with a business violation if `destination_type` is not available.
    pub fn verify(&self, destination_type: DestinationType) -> Result<()> {
        if self.is_available(destination_type) {
            return Ok(());
        }

        Err(Error::business_violation(format!(
            "Destination type {destination_type} is not available in the {} edition",
            self.edition
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_community_edition() {
        let available = AvailableDestinationTypes::for_edition(Edition::Community);
        assert_eq!(
            available.available(),
            [DestinationType::GoogleSheets, DestinationType::LookerStudio]
        );
        assert!(available.verify(DestinationType::GoogleSheets).is_ok());

        let error = available.verify(DestinationType::Slack).unwrap_err();
        assert!(error.is_business_violation());
        assert!(error.public_message().contains("SLACK"));
    }

    #[test]
    fn test_enterprise_edition() {
        let available = AvailableDestinationTypes::for_edition(Edition::Enterprise);
        assert_eq!(available.available().len(), 6);
        assert!(available.verify(DestinationType::MsTeams).is_ok());
    }

    #[test]
    fn test_edition_from_str() {
        assert_eq!(Edition::from_str("enterprise").unwrap(), Edition::Enterprise);
        assert_eq!(Edition::Community.to_string(), "community");
        assert!(Edition::from_str("premium").is_err());
    }
}
