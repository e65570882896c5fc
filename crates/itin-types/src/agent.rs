use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one of the pipeline's agent kinds. Used as the key into
/// `Itinerary.agents` and in event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentName {
    SkeletonPlanner,
    DayPlanner,
    ActivityAgent,
    MealAgent,
    TransportAgent,
    CostEstimator,
    EnrichmentAgent,
}

impl AgentName {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentName::SkeletonPlanner => "skeleton_planner",
            AgentName::DayPlanner => "day_planner",
            AgentName::ActivityAgent => "activity_agent",
            AgentName::MealAgent => "meal_agent",
            AgentName::TransportAgent => "transport_agent",
            AgentName::CostEstimator => "cost_estimator",
            AgentName::EnrichmentAgent => "enrichment_agent",
        }
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eight pipeline phases, in fixed execution order (spec §4.4). Wire
/// names follow the glossary's phase list (skeleton, dayplan, ..,
/// enrichment, finalize), which diverges from the Rust identifiers for
/// `DayPlan`, `Enrich`, and `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Idle,
    Initializing,
    Skeleton,
    #[serde(rename = "dayplan")]
    DayPlan,
    Populate,
    Cost,
    #[serde(rename = "enrichment")]
    Enrich,
    #[serde(rename = "finalize")]
    Complete,
}

impl PhaseName {
    pub const ORDER: [PhaseName; 8] = [
        PhaseName::Idle,
        PhaseName::Initializing,
        PhaseName::Skeleton,
        PhaseName::DayPlan,
        PhaseName::Populate,
        PhaseName::Cost,
        PhaseName::Enrich,
        PhaseName::Complete,
    ];

    pub fn next(self) -> Option<PhaseName> {
        let idx = Self::ORDER.iter().position(|p| *p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Idle => "idle",
            PhaseName::Initializing => "initializing",
            PhaseName::Skeleton => "skeleton",
            PhaseName::DayPlan => "dayplan",
            PhaseName::Populate => "populate",
            PhaseName::Cost => "cost",
            PhaseName::Enrich => "enrichment",
            PhaseName::Complete => "finalize",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
