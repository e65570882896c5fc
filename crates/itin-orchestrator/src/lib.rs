pub mod initialization;
pub mod phase;
pub mod pipeline;
pub mod state_machine;
pub mod unit;

pub use initialization::InitializationService;
pub use phase::{meta_for, FailurePolicy, FanOut, PhaseMeta, PHASE_TABLE};
pub use pipeline::{AgentSet, OrchestratorError, PipelineOrchestrator};
pub use state_machine::GenerationState;
pub use unit::{persist_day, persist_node, persist_nodes_batch, NodeMutation, UnitError};
