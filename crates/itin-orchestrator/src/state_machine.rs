use itin_types::PhaseName;

/// The generation state machine (spec §4.4): `Idle -> Initializing ->
/// Skeleton -> DayPlan -> Populate -> Cost -> Enrich -> Complete`, plus
/// terminal `Failed`/`Cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Running(PhaseName),
    Failed,
    Cancelled,
}

impl GenerationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GenerationState::Failed | GenerationState::Cancelled) || self == GenerationState::Running(PhaseName::Complete)
    }

    /// Advances to the next phase in `PhaseName::ORDER`. A transition out
    /// of a terminal state is never taken — the orchestrator checks
    /// `is_terminal` before calling this (spec §4.4: "transitions are
    /// taken only after the prior state's persistence boundary succeeds").
    pub fn advance(self) -> Option<GenerationState> {
        match self {
            GenerationState::Running(phase) => phase.next().map(GenerationState::Running),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_through_full_order() {
        let mut state = GenerationState::Running(PhaseName::Idle);
        let mut seen = vec![PhaseName::Idle];
        while let Some(next) = state.advance() {
            state = next;
            if let GenerationState::Running(p) = state {
                seen.push(p);
            }
        }
        assert_eq!(seen, PhaseName::ORDER.to_vec());
    }

    #[test]
    fn complete_is_terminal() {
        assert!(GenerationState::Running(PhaseName::Complete).is_terminal());
        assert!(GenerationState::Failed.is_terminal());
        assert!(GenerationState::Cancelled.is_terminal());
        assert!(!GenerationState::Running(PhaseName::Skeleton).is_terminal());
    }
}
