pub mod agent;
pub mod agents;
pub mod mock;
pub mod provider;

pub use agent::{Agent, AgentError};
pub use agents::{
    ActivityAgent, CostEstimatorAgent, DayPlannerAgent, EnrichmentAgent, MealAgent,
    SkeletonPlannerAgent, TransportAgent,
};
pub use mock::MockProvider;
pub use provider::{ChatMessage, Provider, ProviderInfo, ProviderRegistry};
