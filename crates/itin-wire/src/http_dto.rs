use chrono::{DateTime, NaiveDate, Utc};
use itin_types::{AgentStatus, Day, ItinerarySettings};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Synchronous response body for `POST /itineraries` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItineraryResponse {
    pub itinerary_id: String,
    pub version: u64,
    pub status: String,
    pub estimated_completion_sec: u32,
    pub events_url: String,
    pub initial_structure: ItineraryDto,
}

/// Read-facing shape for `GET /itineraries/{id}` and embedded in the
/// create response. Mirrors `itin_types::Itinerary` field-for-field —
/// kept distinct so the wire shape can diverge from the domain model
/// without touching callers on either side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItineraryDto {
    pub itinerary_id: String,
    pub version: u64,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub themes: Vec<String>,
    pub origin: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<Day>,
    pub settings: ItinerarySettings,
    pub agents: HashMap<String, AgentStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<itin_types::Itinerary> for ItineraryDto {
    fn from(it: itin_types::Itinerary) -> Self {
        Self {
            itinerary_id: it.itinerary_id,
            version: it.version,
            user_id: it.user_id,
            summary: it.summary,
            currency: it.currency,
            themes: it.themes,
            origin: it.origin,
            destination: it.destination,
            start_date: it.start_date,
            end_date: it.end_date,
            days: it.days,
            settings: it.settings,
            agents: it.agents,
            created_at: it.created_at,
            updated_at: it.updated_at,
        }
    }
}

/// Query parameters for `GET /events`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFilterQuery {
    pub itinerary_id: String,
    #[serde(default)]
    pub last_event_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
