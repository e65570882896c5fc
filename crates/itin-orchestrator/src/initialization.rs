use std::collections::HashMap;

use chrono::Utc;
use itin_core::{Storage, StorageError};
use itin_types::{AgentName, AgentStatus, CreateItineraryRequest, Day, Itinerary};
use uuid::Uuid;

/// Initialization Service (IS) collaborator boundary (spec §2): called
/// once per request, synchronously, before the async pipeline starts.
/// Produces version = 1 with placeholder days so the HTTP facade has a
/// fully-formed document to hand back immediately.
pub struct InitializationService;

impl InitializationService {
    pub async fn initialize(storage: &Storage, req: &CreateItineraryRequest) -> Result<Itinerary, StorageError> {
        let itinerary_id = Uuid::new_v4().to_string();
        let span = Itinerary::span_days(req.start_date, req.end_date);
        let days: Vec<Day> = (1..=span)
            .map(|n| {
                let date = req.start_date + chrono::Duration::days((n - 1) as i64);
                Day::placeholder(n, date)
            })
            .collect();

        let mut agents = HashMap::new();
        for name in [
            AgentName::SkeletonPlanner,
            AgentName::DayPlanner,
            AgentName::ActivityAgent,
            AgentName::MealAgent,
            AgentName::TransportAgent,
            AgentName::CostEstimator,
            AgentName::EnrichmentAgent,
        ] {
            agents.insert(name.to_string(), AgentStatus::default());
        }

        let now = Utc::now();
        let itinerary = Itinerary {
            itinerary_id,
            version: 1,
            user_id: req.user_id.clone(),
            summary: None,
            currency: req.currency.clone().unwrap_or_else(|| "USD".to_string()),
            themes: req.themes.clone(),
            origin: req.origin.clone(),
            destination: req.destination.clone(),
            start_date: req.start_date,
            end_date: req.end_date,
            days,
            settings: req.settings(),
            agents,
            created_at: now,
            updated_at: now,
        };

        storage.create(itinerary.clone()).await?;
        Ok(itinerary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itin_types::Party;

    #[tokio::test]
    async fn initialize_creates_placeholder_days_matching_span() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let req = CreateItineraryRequest {
            user_id: "user-1".into(),
            origin: "NYC".into(),
            destination: "Barcelona".into(),
            start_date: chrono::NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(),
            currency: None,
            themes: vec![],
            party: Party::default(),
            budget_tier: None,
            interests: vec![],
        };

        let itinerary = InitializationService::initialize(&storage, &req).await.unwrap();
        assert_eq!(itinerary.version, 1);
        assert_eq!(itinerary.days.len(), 3);
        assert!(itinerary.days.iter().all(|d| d.is_placeholder()));
        assert_eq!(itinerary.agents.len(), 7);
    }
}
