use chrono::{DateTime, Utc};
use itin_types::{AgentName, Day, ErrorKind, Node, PhaseName, Severity};
use serde::{Deserialize, Serialize};

/// Tag for `EventEnvelope.type`. `Connected` and `RecoveryIncomplete` are
/// handshake events (no `event_id`); the rest are sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    RecoveryIncomplete,
    PhaseStarted,
    PhaseCompleted,
    Progress,
    DayCompleted,
    NodeEnhanced,
    PartialFailure,
    Error,
    GenerationComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Connected {
        last_event_id: Option<u64>,
    },
    RecoveryIncomplete {
        tail_oldest_event_id: u64,
    },
    PhaseStarted {
        phase: PhaseName,
        expected_units: u32,
    },
    PhaseCompleted {
        phase: PhaseName,
        produced_units: u32,
        duration_ms: u64,
    },
    Progress {
        overall_pct: u8,
        phase: PhaseName,
        current_activity: String,
    },
    DayCompleted {
        day_number: u32,
        day: Day,
    },
    NodeEnhanced {
        day_number: u32,
        node_id: String,
        node: Node,
    },
    PartialFailure {
        scope: String,
        kind: ErrorKind,
        user_message: String,
        retryable: bool,
    },
    Error {
        kind: ErrorKind,
        user_message: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
    GenerationComplete {
        final_version: u64,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::Connected { .. } => EventType::Connected,
            EventPayload::RecoveryIncomplete { .. } => EventType::RecoveryIncomplete,
            EventPayload::PhaseStarted { .. } => EventType::PhaseStarted,
            EventPayload::PhaseCompleted { .. } => EventType::PhaseCompleted,
            EventPayload::Progress { .. } => EventType::Progress,
            EventPayload::DayCompleted { .. } => EventType::DayCompleted,
            EventPayload::NodeEnhanced { .. } => EventType::NodeEnhanced,
            EventPayload::PartialFailure { .. } => EventType::PartialFailure,
            EventPayload::Error { .. } => EventType::Error,
            EventPayload::GenerationComplete { .. } => EventType::GenerationComplete,
        }
    }
}

/// On-wire event envelope (spec §6). `event_id` is absent for handshake
/// events (`connected`/`recovery_incomplete`); present and strictly
/// increasing per itinerary for everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,
    pub itinerary_id: String,
    pub execution_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl EventEnvelope {
    /// Builds an envelope without an `event_id` — the Connection Manager
    /// assigns one (or leaves it `None` for handshake events) before
    /// appending to the tail.
    pub fn new(itinerary_id: impl Into<String>, execution_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: None,
            itinerary_id: itinerary_id.into(),
            execution_id: execution_id.into(),
            event_type: payload.event_type(),
            timestamp: Utc::now(),
            payload,
            severity: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_event_id(mut self, event_id: u64) -> Self {
        self.event_id = Some(event_id);
        self
    }
}

pub fn agent_name_key(name: AgentName) -> String {
    name.as_str().to_string()
}
