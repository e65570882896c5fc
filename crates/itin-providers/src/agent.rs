use async_trait::async_trait;
use itin_types::{ErrorKind, ExecutionContext};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct AgentError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AgentError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientUpstream, message)
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonRetryableUpstream, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// The one capability every pipeline agent implements (spec §4.3,
/// §9 "collapse inheritance hierarchies to one capability set"). `input`
/// and `output` are opaque JSON values by design — the orchestrator owns
/// interpreting them into domain types, so adding an agent never requires
/// touching this trait.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> itin_types::AgentName;

    fn is_retryable(&self) -> bool {
        true
    }

    fn max_attempts(&self) -> u32 {
        3
    }

    fn base_backoff_ms(&self) -> u64 {
        250
    }

    fn per_attempt_timeout_ms(&self) -> u64 {
        20_000
    }

    /// Whether exhausting retries on this agent aborts the whole
    /// generation (spec §4.3/§4.4's per-phase fatal/non-fatal policy).
    fn fatal_on_failure(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &ExecutionContext, input: Value) -> Result<Value, AgentError>;
}
