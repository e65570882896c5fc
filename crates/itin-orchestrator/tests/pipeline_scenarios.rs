//! End-to-end coverage of spec §8 Scenarios A, D, E — a full generation run
//! driven through `PipelineOrchestrator::generate` against real `Storage`
//! and `ConnectionManager` instances, the way `tandem-server`'s own
//! `tests/`-style HTTP-flow coverage drives full request/response cycles
//! rather than individual functions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use itin_core::{CancellationRegistry, ConnectionManager, PipelineConfig, Storage};
use itin_orchestrator::{OrchestratorError, PipelineOrchestrator};
use itin_providers::{Agent, AgentError, MockProvider, Provider};
use itin_providers::{ActivityAgent, CostEstimatorAgent, DayPlannerAgent, EnrichmentAgent, MealAgent, SkeletonPlannerAgent, TransportAgent};
use itin_types::{AgentName, AgentState, CreateItineraryRequest, ExecutionContext, NodeStatus, Party};
use itin_wire::{EventEnvelope, EventPayload};
use tokio::sync::mpsc;

async fn seed_request(days: i64) -> CreateItineraryRequest {
    let start = chrono::NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
    CreateItineraryRequest {
        user_id: "user-1".into(),
        origin: "NYC".into(),
        destination: "Barcelona".into(),
        start_date: start,
        end_date: start + chrono::Duration::days(days - 1),
        currency: None,
        themes: vec!["culture".into(), "food".into()],
        party: Party { adults: 2, children: 1 },
        budget_tier: Some("medium".into()),
        interests: vec!["culture".into(), "food".into()],
    }
}

fn mock_agent_set() -> itin_orchestrator::AgentSet {
    let provider: Arc<dyn Provider> = Arc::new(MockProvider::new("mock"));
    itin_orchestrator::AgentSet {
        skeleton_planner: Arc::new(SkeletonPlannerAgent { provider: provider.clone() }),
        day_planner: Arc::new(DayPlannerAgent { provider: provider.clone() }),
        activity: Arc::new(ActivityAgent { provider: provider.clone() }),
        meal: Arc::new(MealAgent { provider: provider.clone() }),
        transport: Arc::new(TransportAgent { provider: provider.clone() }),
        cost_estimator: Arc::new(CostEstimatorAgent { provider: provider.clone() }),
        enrichment: Arc::new(EnrichmentAgent { provider }),
    }
}

async fn drain(rx: &mut mpsc::Receiver<EventEnvelope>) -> Vec<EventEnvelope> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

struct Harness {
    _dir: tempfile::TempDir,
    storage: Arc<Storage>,
    cm: Arc<ConnectionManager>,
    orchestrator: PipelineOrchestrator,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
    let cm = Arc::new(ConnectionManager::new(256, 256));
    let cancellations = Arc::new(CancellationRegistry::new());
    let orchestrator = PipelineOrchestrator::new(storage.clone(), cm.clone(), cancellations, PipelineConfig::default());
    Harness { _dir: dir, storage, cm, orchestrator }
}

/// Scenario A — happy path: every phase runs, progress never regresses,
/// the event stream ends in `generation_complete`, and the itinerary lands
/// at a version consistent with "skeleton + dayplan + populate + cost +
/// enrichment batch each bumped the version at least once" (spec §8:
/// `finalVersion >= 5`).
#[tokio::test]
async fn scenario_a_happy_path_completes_with_monotone_progress() {
    let h = harness().await;
    let req = seed_request(2).await;
    let itinerary = itin_orchestrator::InitializationService::initialize(&h.storage, &req).await.unwrap();
    let id = itinerary.itinerary_id.clone();

    let (registration, _replay, _last) = h.cm.register(&id, None).await;
    let mut rx = registration.take_receiver().await.unwrap();

    let agents = mock_agent_set();
    h.orchestrator.generate(id.clone(), &agents).await.expect("generation succeeds");

    let events = drain(&mut rx).await;
    assert!(!events.is_empty(), "expected at least the phase/progress/completion events");

    let skeleton_started = events.iter().position(|e| matches!(e.payload, EventPayload::PhaseStarted { phase: itin_types::PhaseName::Skeleton, .. })).unwrap();
    let skeleton_completed = events.iter().position(|e| matches!(e.payload, EventPayload::PhaseCompleted { phase: itin_types::PhaseName::Skeleton, .. })).unwrap();
    assert!(skeleton_started < skeleton_completed);

    let dayplan_completed = events.iter().position(|e| matches!(e.payload, EventPayload::PhaseCompleted { phase: itin_types::PhaseName::DayPlan, .. })).unwrap();
    assert!(skeleton_completed < dayplan_completed);

    let day_completed_count = events.iter().filter(|e| matches!(e.payload, EventPayload::DayCompleted { .. })).count();
    assert!(day_completed_count >= 2, "both days should complete at least once during dayplan");

    let last = events.last().unwrap();
    assert!(matches!(last.payload, EventPayload::GenerationComplete { final_version } if final_version >= 5));

    let mut watermark = 0u8;
    for event in &events {
        if let EventPayload::Progress { overall_pct, .. } = &event.payload {
            assert!(*overall_pct >= watermark, "progress must never regress");
            watermark = *overall_pct;
        }
    }

    let stored = h.storage.get(&id).await.unwrap();
    assert!(stored.version >= 5);
    assert!(stored.agents.values().all(|s| s.state == AgentState::Succeeded));
    let enhanced_nodes = stored.days.iter().flat_map(|d| d.nodes.iter()).filter(|n| n.status == NodeStatus::Enhanced).count();
    assert!(enhanced_nodes > 0, "enrichment should have enhanced at least one node");
}

struct FailFirstEnrichmentAgent {
    has_failed: AtomicBool,
}

#[async_trait]
impl Agent for FailFirstEnrichmentAgent {
    fn name(&self) -> AgentName {
        AgentName::EnrichmentAgent
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    async fn run(&self, _ctx: &ExecutionContext, input: serde_json::Value) -> Result<serde_json::Value, AgentError> {
        if !self.has_failed.swap(true, Ordering::SeqCst) {
            return Err(AgentError::non_retryable("enrichment upstream rejected this stop"));
        }
        let title = input["title"].as_str().unwrap_or("this stop");
        Ok(serde_json::json!({ "details": { "description": format!("detail for {title}") } }))
    }
}

/// Scenario D — partial failure: one node's enrichment fails with a
/// non-retryable upstream error; every other node still gets enhanced and
/// the run still ends in `generation_complete`, not an `error`.
#[tokio::test]
async fn scenario_d_partial_failure_skips_one_node_but_completes() {
    let h = harness().await;
    let req = seed_request(2).await;
    let itinerary = itin_orchestrator::InitializationService::initialize(&h.storage, &req).await.unwrap();
    let id = itinerary.itinerary_id.clone();

    let (registration, _replay, _last) = h.cm.register(&id, None).await;
    let mut rx = registration.take_receiver().await.unwrap();

    let mut agents = mock_agent_set();
    agents.enrichment = Arc::new(FailFirstEnrichmentAgent { has_failed: AtomicBool::new(false) });

    h.orchestrator.generate(id.clone(), &agents).await.expect("generation still completes");

    let events = drain(&mut rx).await;
    let partial_failures: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::PartialFailure { scope, kind, .. } => Some((scope.clone(), *kind)),
            _ => None,
        })
        .collect();
    assert_eq!(partial_failures.len(), 1, "exactly one node should fail enrichment");
    assert!(partial_failures[0].0.starts_with("node:"));
    assert_eq!(partial_failures[0].1, itin_types::ErrorKind::NonRetryableUpstream);

    assert!(matches!(events.last().unwrap().payload, EventPayload::GenerationComplete { .. }));

    let stored = h.storage.get(&id).await.unwrap();
    let nodes: Vec<_> = stored.days.iter().flat_map(|d| d.nodes.iter()).collect();
    let enhanced = nodes.iter().filter(|n| n.status == NodeStatus::Enhanced).count();
    let planned = nodes.iter().filter(|n| n.status == NodeStatus::Planned).count();
    assert_eq!(planned, 1, "the one failed node stays at its pre-enrichment status");
    assert_eq!(enhanced, nodes.len() - 1, "every other node was enhanced");
}

struct AlwaysFatalNonRetryable;

#[async_trait]
impl Agent for AlwaysFatalNonRetryable {
    fn name(&self) -> AgentName {
        AgentName::SkeletonPlanner
    }

    fn fatal_on_failure(&self) -> bool {
        true
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    async fn run(&self, _ctx: &ExecutionContext, _input: serde_json::Value) -> Result<serde_json::Value, AgentError> {
        Err(AgentError::non_retryable("upstream refused the skeleton request"))
    }
}

/// Scenario E — fatal failure in the skeleton phase: no `generation_complete`,
/// `agents.skeleton_planner` durably `failed`, every other agent `skipped`.
#[tokio::test]
async fn scenario_e_fatal_skeleton_failure_skips_downstream_agents() {
    let h = harness().await;
    let req = seed_request(2).await;
    let itinerary = itin_orchestrator::InitializationService::initialize(&h.storage, &req).await.unwrap();
    let id = itinerary.itinerary_id.clone();

    let (registration, _replay, _last) = h.cm.register(&id, None).await;
    let mut rx = registration.take_receiver().await.unwrap();

    let mut agents = mock_agent_set();
    agents.skeleton_planner = Arc::new(AlwaysFatalNonRetryable);

    let result = h.orchestrator.generate(id.clone(), &agents).await;
    assert!(matches!(result, Err(OrchestratorError::Fatal { phase: itin_types::PhaseName::Skeleton, .. })));

    let events = drain(&mut rx).await;
    assert!(events.iter().all(|e| !matches!(e.payload, EventPayload::GenerationComplete { .. })));
    let error_event = events.iter().find(|e| matches!(e.payload, EventPayload::Error { .. })).unwrap();
    assert!(matches!(error_event.severity, Some(itin_types::Severity::Fatal)));

    let stored = h.storage.get(&id).await.unwrap();
    let skeleton_status = stored.agents.get(AgentName::SkeletonPlanner.as_str()).unwrap();
    assert_eq!(skeleton_status.state, AgentState::Failed);
    for (name, status) in &stored.agents {
        if name != AgentName::SkeletonPlanner.as_str() {
            assert_eq!(status.state, AgentState::Skipped, "{name} should be skipped after a fatal skeleton failure");
        }
    }
}

/// Scenario F (bus-level slice) — a subscriber that never reads is
/// unregistered lazily by the bus (its channel fills and `try_send` starts
/// failing) without blocking delivery to a second, actively-draining
/// subscriber on the same itinerary.
#[tokio::test]
async fn scenario_f_slow_subscriber_does_not_block_others() {
    let cm = ConnectionManager::new(16, 4);
    let (slow_reg, _replay, _last) = cm.register("trip-1", None).await;
    let _slow_rx = slow_reg.take_receiver().await.unwrap();
    let (fast_reg, _replay, _last) = cm.register("trip-1", None).await;
    let mut fast_rx = fast_reg.take_receiver().await.unwrap();

    for i in 0..50u32 {
        cm.broadcast(
            "trip-1",
            EventEnvelope::new(
                "trip-1",
                "exec-1",
                EventPayload::Progress {
                    overall_pct: (i % 100) as u8,
                    phase: itin_types::PhaseName::Skeleton,
                    current_activity: "working".into(),
                },
            ),
        )
        .await;
    }

    let mut received = 0u32;
    while fast_rx.try_recv().is_ok() {
        received += 1;
    }
    assert!(received > 0, "the fast subscriber must still receive events even though the slow one never drains");
}

struct ForeverSlowAgent;

#[async_trait]
impl Agent for ForeverSlowAgent {
    fn name(&self) -> AgentName {
        AgentName::SkeletonPlanner
    }

    fn per_attempt_timeout_ms(&self) -> u64 {
        60_000
    }

    async fn run(&self, _ctx: &ExecutionContext, _input: serde_json::Value) -> Result<serde_json::Value, AgentError> {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Ok(serde_json::json!({}))
    }
}

/// `generation_deadline_ms` (maintainer review: the field was declared but
/// never wired) aborts a stuck generation instead of hanging forever.
#[tokio::test]
async fn generation_deadline_cancels_a_stuck_run() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
    let cm = Arc::new(ConnectionManager::new(64, 64));
    let cancellations = Arc::new(CancellationRegistry::new());
    let mut config = PipelineConfig::default();
    config.generation_deadline_ms = 50;
    let orchestrator = PipelineOrchestrator::new(storage.clone(), cm.clone(), cancellations, config);

    let req = seed_request(1).await;
    let itinerary = itin_orchestrator::InitializationService::initialize(&storage, &req).await.unwrap();
    let id = itinerary.itinerary_id.clone();

    let (registration, _replay, _last) = cm.register(&id, None).await;
    let mut rx = registration.take_receiver().await.unwrap();

    let mut agents = mock_agent_set();
    agents.skeleton_planner = Arc::new(ForeverSlowAgent);

    let result = orchestrator.generate(id.clone(), &agents).await;
    assert!(matches!(result, Err(OrchestratorError::DeadlineExceeded { .. })));

    let events = drain(&mut rx).await;
    assert!(events.iter().all(|e| !matches!(e.payload, EventPayload::GenerationComplete { .. })));
    let error_event = events.iter().find(|e| matches!(e.payload, EventPayload::Error { kind: itin_types::ErrorKind::Cancelled, .. })).unwrap();
    assert!(matches!(error_event.severity, Some(itin_types::Severity::Fatal)));
}
