use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Attraction,
    Meal,
    Accommodation,
    Transport,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Placeholder,
    Planned,
    Enhanced,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl NodeLocation {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeTiming {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeCost {
    pub amount: f64,
    pub currency: String,
}

/// A single unit of plan: attraction, meal, transport, accommodation.
/// Invariants (spec §3): `locked=true` forbids mutation by any agent;
/// once `booking_ref` is set, type/title/timing become immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<NodeLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<NodeTiming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<NodeCost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_ref: Option<String>,
    #[serde(default)]
    pub locked: bool,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn placeholder(id: impl Into<String>, node_type: NodeType, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            title: title.into(),
            location: None,
            timing: None,
            cost: None,
            details: None,
            booking_ref: None,
            locked: false,
            status: NodeStatus::Placeholder,
            updated_by: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether this node's type/title/timing/booking fields are frozen
    /// (spec §3: "once `bookingRef` is set, type/title/timing become
    /// immutable"; `locked` forbids any mutation).
    pub fn is_immutable(&self) -> bool {
        self.locked || self.booking_ref.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DayPacing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DayTimeWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DayTotals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<NodeCost>,
    #[serde(default)]
    pub node_count: u32,
}

/// A dated segment of the itinerary. A day is either `placeholder` (no
/// nodes, or all nodes tagged placeholder) or `populated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Day {
    pub day_number: u32,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing: Option<DayPacing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<DayTimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<DayTotals>,
}

impl Day {
    pub fn placeholder(day_number: u32, date: NaiveDate) -> Self {
        Self {
            day_number,
            date,
            location: None,
            nodes: Vec::new(),
            pacing: None,
            time_window: None,
            totals: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.nodes.is_empty() || self.nodes.iter().all(|n| n.status == NodeStatus::Placeholder)
    }

    /// Sorts nodes by known start time, keeping unknown-timing nodes in
    /// their current relative order after the timed ones (spec §3: "nodes
    /// are ordered by start time where timing is known").
    pub fn sort_nodes_by_start_time(&mut self) {
        self.nodes.sort_by(|a, b| {
            let a_start = a.timing.as_ref().and_then(|t| t.start_time.as_deref());
            let b_start = b.timing.as_ref().and_then(|t| t.start_time.as_deref());
            match (a_start, b_start) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Per-agent status tracked on the itinerary. Monotone: once `succeeded`
/// or `failed`, only `progress` may still change (and only upward).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            state: AgentState::Pending,
            progress: 0,
            last_message: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl AgentStatus {
    /// Applies a new state, refusing to move progress backwards and
    /// refusing to leave a terminal state (spec §3 monotonicity rule).
    pub fn transition(&mut self, state: AgentState, progress: u8, message: Option<String>) {
        let currently_terminal = matches!(self.state, AgentState::Succeeded | AgentState::Failed);
        if currently_terminal && !matches!(state, AgentState::Succeeded | AgentState::Failed) {
            self.progress = self.progress.max(progress);
            if let Some(message) = message {
                self.last_message = Some(message);
            }
            return;
        }
        self.state = state;
        self.progress = self.progress.max(progress);
        if let Some(message) = message {
            self.last_message = Some(message);
        }
        match state {
            AgentState::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            AgentState::Succeeded | AgentState::Failed | AgentState::Skipped => {
                self.finished_at = Some(Utc::now());
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Party {
    #[serde(default)]
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ItinerarySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tier: Option<String>,
    #[serde(default)]
    pub party: Party,
    #[serde(default)]
    pub interests: Vec<String>,
}

/// The versioned, ordered plan. `version` strictly increases with every
/// successful durable mutation (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Itinerary {
    pub itinerary_id: String,
    pub version: u64,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub themes: Vec<String>,
    pub origin: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<Day>,
    pub settings: ItinerarySettings,
    pub agents: HashMap<String, AgentStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Itinerary {
    /// 1-based length of the date span, inclusive (spec §3: "days length
    /// equals date span in days once initialized").
    pub fn span_days(start: NaiveDate, end: NaiveDate) -> u32 {
        (end - start).num_days().max(0) as u32 + 1
    }

    pub fn day_mut(&mut self, day_number: u32) -> Option<&mut Day> {
        self.days.iter_mut().find(|d| d.day_number == day_number)
    }

    pub fn node_mut(&mut self, day_number: u32, node_id: &str) -> Option<&mut Node> {
        self.day_mut(day_number)?
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}
