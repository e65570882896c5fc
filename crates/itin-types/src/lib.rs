pub mod agent;
pub mod error;
pub mod execution;
pub mod itinerary;
pub mod request;

pub use agent::{AgentName, PhaseName};
pub use error::{ErrorKind, Severity};
pub use execution::ExecutionContext;
pub use itinerary::{
    AgentState, AgentStatus, Day, DayPacing, DayTimeWindow, DayTotals, Itinerary,
    ItinerarySettings, Node, NodeCost, NodeLocation, NodeStatus, NodeTiming, NodeType, Party,
};
pub use request::{CreateItineraryRequest, RequestValidationError};
