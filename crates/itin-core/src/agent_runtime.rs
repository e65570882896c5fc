use std::time::Duration;

use itin_providers::{Agent, AgentError};
use itin_types::{AgentState, AgentStatus, ErrorKind, ExecutionContext};
use rand::Rng;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Outcome of one `AgentRuntime::invoke` call. `Skipped` carries the
/// reason so the orchestrator can decide whether a `partial_failure`
/// event has already been emitted by the runtime or still needs one.
pub enum Invocation {
    Succeeded(Value),
    Skipped { reason: String },
    Cancelled,
}

/// Runs a single agent invocation within an `ExecutionContext`, applying
/// uniform retry, timeout, and cancellation handling (spec §4.3).
/// Grounded on `tandem-core::engine_loop`'s `cancel.is_cancelled()` /
/// `CancellationToken` checks and `tandem-providers::Provider`'s
/// `async_trait` shape.
pub struct AgentRuntime;

impl AgentRuntime {
    /// Drives the attempt loop described in spec §4.3 step 2. Updates
    /// `status` in place so the caller can persist `agents[name]` at the
    /// phase boundary rule in §4.4. Returns the agent's fatality
    /// declaration via `Invocation::Skipped` when non-fatal and
    /// `Err(AgentError)` when `fatal_on_failure()` and attempts exhaust.
    pub async fn invoke(
        agent: &dyn Agent,
        ctx: &ExecutionContext,
        input: Value,
        status: &mut AgentStatus,
        cancel: &CancellationToken,
    ) -> Result<Invocation, AgentError> {
        status.transition(AgentState::Running, 0, None);

        let max_attempts = agent.max_attempts().max(1);
        let mut last_error: Option<AgentError> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                status.transition(AgentState::Failed, status.progress, Some("cancelled".to_string()));
                return Ok(Invocation::Cancelled);
            }

            let timeout = Duration::from_millis(agent.per_attempt_timeout_ms());
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    status.transition(AgentState::Failed, status.progress, Some("cancelled".to_string()));
                    return Ok(Invocation::Cancelled);
                }
                result = tokio::time::timeout(timeout, agent.run(ctx, input.clone())) => result,
            };

            match outcome {
                Ok(Ok(output)) => {
                    status.transition(AgentState::Succeeded, 100, None);
                    return Ok(Invocation::Succeeded(output));
                }
                Ok(Err(err)) => {
                    let retryable = agent.is_retryable() && err.kind.is_retryable() && attempt < max_attempts;
                    if retryable {
                        let backoff = backoff_with_jitter(agent.base_backoff_ms(), attempt);
                        tracing::debug!(agent = %agent.name(), attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "agent attempt failed, retrying");
                        last_error = Some(err);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    last_error = Some(err);
                    break;
                }
                Err(_elapsed) => {
                    let err = AgentError::transient(format!("attempt {attempt} timed out after {}ms", agent.per_attempt_timeout_ms()));
                    if agent.is_retryable() && attempt < max_attempts {
                        let backoff = backoff_with_jitter(agent.base_backoff_ms(), attempt);
                        tracing::debug!(agent = %agent.name(), attempt, backoff_ms = backoff.as_millis() as u64, "agent attempt timed out, retrying");
                        last_error = Some(err);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    last_error = Some(err);
                    break;
                }
            }
        }

        let error = last_error.unwrap_or_else(|| AgentError::new(ErrorKind::Internal, "agent failed with no recorded error"));
        status.transition(AgentState::Failed, status.progress, Some(error.message.clone()));

        if agent.fatal_on_failure() {
            Err(error)
        } else {
            Ok(Invocation::Skipped { reason: error.message })
        }
    }
}

fn backoff_with_jitter(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let capped = exp.min(4_000);
    let jitter_range = (capped as f64 * 0.2) as i64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0
    };
    let with_jitter = (capped as i64 + jitter).max(0) as u64;
    Duration::from_millis(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use itin_types::AgentName;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyAgent {
        failures_before_success: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn name(&self) -> AgentName {
            AgentName::ActivityAgent
        }

        fn base_backoff_ms(&self) -> u64 {
            1
        }

        async fn run(&self, _ctx: &ExecutionContext, _input: Value) -> Result<Value, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(AgentError::transient("not yet"))
            } else {
                Ok(json!({ "ok": true }))
            }
        }
    }

    struct AlwaysFatalAgent;

    #[async_trait]
    impl Agent for AlwaysFatalAgent {
        fn name(&self) -> AgentName {
            AgentName::SkeletonPlanner
        }

        fn fatal_on_failure(&self) -> bool {
            true
        }

        fn max_attempts(&self) -> u32 {
            1
        }

        async fn run(&self, _ctx: &ExecutionContext, _input: Value) -> Result<Value, AgentError> {
            Err(AgentError::non_retryable("nope"))
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let agent = FlakyAgent {
            failures_before_success: 2,
            calls: Arc::new(AtomicU32::new(0)),
        };
        let ctx = ExecutionContext::new("exec-1", "trip-1");
        let mut status = AgentStatus::default();
        let cancel = CancellationToken::new();

        let result = AgentRuntime::invoke(&agent, &ctx, json!({}), &mut status, &cancel)
            .await
            .unwrap();
        assert!(matches!(result, Invocation::Succeeded(_)));
        assert_eq!(status.state, AgentState::Succeeded);
    }

    #[tokio::test]
    async fn fatal_agent_propagates_error() {
        let agent = AlwaysFatalAgent;
        let ctx = ExecutionContext::new("exec-1", "trip-1");
        let mut status = AgentStatus::default();
        let cancel = CancellationToken::new();

        let result = AgentRuntime::invoke(&agent, &ctx, json!({}), &mut status, &cancel).await;
        assert!(result.is_err());
        assert_eq!(status.state, AgentState::Failed);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let agent = AlwaysFatalAgent;
        let ctx = ExecutionContext::new("exec-1", "trip-1");
        let mut status = AgentStatus::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = AgentRuntime::invoke(&agent, &ctx, json!({}), &mut status, &cancel)
            .await
            .unwrap();
        assert!(matches!(result, Invocation::Cancelled));
    }
}
