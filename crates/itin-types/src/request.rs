use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::itinerary::{ItinerarySettings, Party};

/// Inbound shape for `POST /itineraries`. Validated by the Initialization
/// Service before an `Itinerary` is constructed (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItineraryRequest {
    pub user_id: String,
    pub origin: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub party: Party,
    #[serde(default)]
    pub budget_tier: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestValidationError {
    #[error("end_date must not precede start_date")]
    DateRangeInverted,
    #[error("origin and destination must be non-empty")]
    MissingLocation,
}

impl CreateItineraryRequest {
    pub fn validate(&self) -> Result<(), RequestValidationError> {
        if self.end_date < self.start_date {
            return Err(RequestValidationError::DateRangeInverted);
        }
        if self.origin.trim().is_empty() || self.destination.trim().is_empty() {
            return Err(RequestValidationError::MissingLocation);
        }
        Ok(())
    }

    pub fn settings(&self) -> ItinerarySettings {
        ItinerarySettings {
            budget_tier: self.budget_tier.clone(),
            party: self.party.clone(),
            interests: self.interests.clone(),
        }
    }
}
