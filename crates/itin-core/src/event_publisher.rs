use std::collections::HashMap;
use std::sync::Arc;

use itin_types::{ErrorKind, ExecutionContext, Node, Severity};
use itin_wire::{EventEnvelope, EventPayload};
use itin_types::{Day, PhaseName};
use tokio::sync::RwLock;

use crate::event_bus::ConnectionManager;

/// Typed, ergonomic event construction (spec §4.2). The only path
/// through which agents and the orchestrator emit events — callers never
/// build an `EventEnvelope` by hand, so normalization (severity
/// classification, progress watermarking) happens in exactly one place.
pub struct EventPublisher {
    cm: Arc<ConnectionManager>,
    progress_watermark: RwLock<HashMap<String, u8>>,
}

impl EventPublisher {
    pub fn new(cm: Arc<ConnectionManager>) -> Self {
        Self {
            cm,
            progress_watermark: RwLock::new(HashMap::new()),
        }
    }

    pub async fn publish_phase_started(&self, ctx: &ExecutionContext, phase: PhaseName, expected_units: u32) {
        self.emit(ctx, EventPayload::PhaseStarted { phase, expected_units }, None).await;
    }

    pub async fn publish_phase_completed(&self, ctx: &ExecutionContext, phase: PhaseName, produced_units: u32, duration_ms: u64) {
        self.emit(
            ctx,
            EventPayload::PhaseCompleted { phase, produced_units, duration_ms },
            None,
        )
        .await;
    }

    pub async fn publish_day_completed(&self, ctx: &ExecutionContext, day_number: u32, day: Day) {
        self.emit(ctx, EventPayload::DayCompleted { day_number, day }, None).await;
    }

    pub async fn publish_node_enhanced(&self, ctx: &ExecutionContext, day_number: u32, node_id: String, node: Node) {
        self.emit(
            ctx,
            EventPayload::NodeEnhanced { day_number, node_id, node },
            None,
        )
        .await;
    }

    /// `overall_pct` is silently raised to the highest value seen so far
    /// for this execution (spec §4.2's overall-progress rule); it never
    /// regresses on the wire even if a caller passes a stale value.
    ///
    /// The watermark guard is held across the broadcast itself, not just
    /// the raise: populate/enrich fan out several concurrent tasks that
    /// all call this, and releasing the lock before `emit` would let two
    /// tasks race to the wire in the opposite order from the one their
    /// raised values were computed in, regressing progress in transit
    /// even though each call's own raise was correct.
    pub async fn publish_progress(&self, ctx: &ExecutionContext, overall_pct: u8, phase: PhaseName, current_activity: String) {
        let mut watermark = self.progress_watermark.write().await;
        let entry = watermark.entry(ctx.execution_id.clone()).or_insert(0);
        *entry = (*entry).max(overall_pct);
        let raised = *entry;
        self.emit(
            ctx,
            EventPayload::Progress { overall_pct: raised, phase, current_activity },
            None,
        )
        .await;
    }

    /// Saturates the watermark at 100 and clears it — progress only
    /// reaches 100 here, never via `publish_progress` directly (spec §4.2).
    pub async fn publish_generation_complete(&self, ctx: &ExecutionContext, final_version: u64) {
        self.progress_watermark.write().await.insert(ctx.execution_id.clone(), 100);
        self.emit(ctx, EventPayload::GenerationComplete { final_version }, None).await;
    }

    pub async fn publish_error(
        &self,
        ctx: &ExecutionContext,
        kind: ErrorKind,
        user_message: String,
        severity: Severity,
        retryable: bool,
        retry_after_ms: Option<u64>,
    ) {
        self.emit(
            ctx,
            EventPayload::Error { kind, user_message, retryable, retry_after_ms },
            Some(severity),
        )
        .await;
    }

    /// Recoverable per-day or per-node failure that does not abort the
    /// pipeline (spec §4.2). Severity is always `error` — a
    /// `partial_failure` by definition prevented a unit, never the run.
    pub async fn publish_partial_failure(&self, ctx: &ExecutionContext, scope: String, kind: ErrorKind, user_message: String) {
        self.emit(
            ctx,
            EventPayload::PartialFailure { scope, kind, user_message, retryable: false },
            Some(Severity::Error),
        )
        .await;
    }

    async fn emit(&self, ctx: &ExecutionContext, payload: EventPayload, severity: Option<Severity>) {
        let mut envelope = EventEnvelope::new(ctx.itinerary_id.clone(), ctx.execution_id.clone(), payload);
        if let Some(severity) = severity {
            envelope = envelope.with_severity(severity);
        }
        self.cm.broadcast(&ctx.itinerary_id, envelope).await;
    }

    pub async fn forget_execution(&self, execution_id: &str) {
        self.progress_watermark.write().await.remove(execution_id);
    }
}
