pub mod event_envelope;
pub mod http_dto;

pub use event_envelope::{agent_name_key, EventEnvelope, EventPayload, EventType};
pub use http_dto::{CreateItineraryResponse, ErrorResponse, EventFilterQuery, ItineraryDto};
