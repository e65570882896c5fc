use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use itin_core::{CancellationRegistry, ConnectionManager, PipelineConfig, Storage};
use itin_orchestrator::{AgentSet, PipelineOrchestrator};
use itin_providers::{
    ActivityAgent, CostEstimatorAgent, DayPlannerAgent, EnrichmentAgent, MealAgent, MockProvider,
    Provider, SkeletonPlannerAgent, TransportAgent,
};
use tokio::sync::Semaphore;

mod http;

pub use http::router;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shared process state handed to every axum handler. `generation_semaphore`
/// bounds the number of itineraries generating concurrently
/// (`max_concurrent_generations`) — a handler awaits a permit before
/// spawning `PipelineOrchestrator::generate`, so admission is a queue, not
/// a rejection.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub connection_manager: Arc<ConnectionManager>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub agents: Arc<AgentSet>,
    pub generation_semaphore: Arc<Semaphore>,
    pub started_at_ms: u64,
}

impl AppState {
    pub async fn new(base_dir: impl AsRef<std::path::Path>, config: PipelineConfig) -> anyhow::Result<Self> {
        let storage = Arc::new(Storage::new(base_dir).await?);
        let connection_manager = Arc::new(ConnectionManager::new(
            config.history_tail_size,
            config.subscriber_buffer_size,
        ));
        let cancellations = Arc::new(CancellationRegistry::new());
        let generation_semaphore = Arc::new(Semaphore::new(config.max_concurrent_generations));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            storage.clone(),
            connection_manager.clone(),
            cancellations,
            config,
        ));
        let agents = Arc::new(default_agent_set());

        Ok(Self {
            storage,
            connection_manager,
            orchestrator,
            agents,
            generation_semaphore,
            started_at_ms: now_ms(),
        })
    }
}

/// Wires the mock provider to every agent kind. A deployment pointed at a
/// real model host would swap this constructor, not the pipeline itself —
/// `PipelineOrchestrator` only ever sees `Arc<dyn Agent>`.
fn default_agent_set() -> AgentSet {
    let provider: Arc<dyn Provider> = Arc::new(MockProvider::new("mock"));
    AgentSet {
        skeleton_planner: Arc::new(SkeletonPlannerAgent { provider: provider.clone() }),
        day_planner: Arc::new(DayPlannerAgent { provider: provider.clone() }),
        activity: Arc::new(ActivityAgent { provider: provider.clone() }),
        meal: Arc::new(MealAgent { provider: provider.clone() }),
        transport: Arc::new(TransportAgent { provider: provider.clone() }),
        cost_estimator: Arc::new(CostEstimatorAgent { provider: provider.clone() }),
        enrichment: Arc::new(EnrichmentAgent { provider }),
    }
}
