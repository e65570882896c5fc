use itin_types::PhaseName;

/// Fan-out shape for one phase: whether it runs once over the whole
/// itinerary or once per day, and whether a unit failure aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    Single,
    PerDay,
    PerNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Fatal,
    NonFatal,
}

/// Static metadata for one row of the phase table (spec §4.4). Doesn't
/// carry the phase's logic — `pipeline::PipelineOrchestrator` dispatches
/// on `PhaseName` directly — just the declared shape used to decide
/// fan-out and whether a failure should abort the generation.
#[derive(Debug, Clone, Copy)]
pub struct PhaseMeta {
    pub name: PhaseName,
    pub fan_out: FanOut,
    pub failure_policy: FailurePolicy,
}

pub const PHASE_TABLE: [PhaseMeta; 8] = [
    PhaseMeta { name: PhaseName::Idle, fan_out: FanOut::Single, failure_policy: FailurePolicy::Fatal },
    PhaseMeta { name: PhaseName::Initializing, fan_out: FanOut::Single, failure_policy: FailurePolicy::Fatal },
    PhaseMeta { name: PhaseName::Skeleton, fan_out: FanOut::Single, failure_policy: FailurePolicy::Fatal },
    PhaseMeta { name: PhaseName::DayPlan, fan_out: FanOut::PerDay, failure_policy: FailurePolicy::NonFatal },
    PhaseMeta { name: PhaseName::Populate, fan_out: FanOut::PerDay, failure_policy: FailurePolicy::NonFatal },
    PhaseMeta { name: PhaseName::Cost, fan_out: FanOut::Single, failure_policy: FailurePolicy::NonFatal },
    PhaseMeta { name: PhaseName::Enrich, fan_out: FanOut::PerNode, failure_policy: FailurePolicy::NonFatal },
    PhaseMeta { name: PhaseName::Complete, fan_out: FanOut::Single, failure_policy: FailurePolicy::Fatal },
];

pub fn meta_for(phase: PhaseName) -> PhaseMeta {
    PHASE_TABLE
        .iter()
        .copied()
        .find(|m| m.name == phase)
        .expect("PHASE_TABLE covers every PhaseName variant")
}
