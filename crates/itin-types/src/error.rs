use serde::{Deserialize, Serialize};

/// Error taxonomy from spec §7. Not a type hierarchy — a closed
/// classification used for retry decisions and user-facing `kind` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    TransientUpstream,
    NonRetryableUpstream,
    Conflict,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether AgentRuntime should retry an attempt that failed with this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientUpstream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}
