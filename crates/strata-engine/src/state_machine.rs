//! Deploy run state machine.
//!
//! ```text
//! Init -> SubstratePlanning -> SubstrateApplying -> SubstrateComplete
//!      -> WorkloadPlanning -> WorkloadApplying -> Done
//! ```
//!
//! `Failed` is terminal and reachable from both applying states, and from
//! `SubstrateComplete` when a target cluster turns out to be unreachable.

use crate::error::DeployError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use strata_graph::Phase;

/// State of one deploy run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum DeployState {
    /// Nothing has happened yet
    Init,
    /// Substrate plan is being computed
    SubstratePlanning,
    /// Substrate batches are running
    SubstrateApplying,
    /// Every substrate node is live
    SubstrateComplete,
    /// Workload plan is being computed
    WorkloadPlanning,
    /// Workload batches are running
    WorkloadApplying,
    /// Run finished
    Done,
    /// Run stopped in the given phase
    Failed(Phase),
}

impl DeployState {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::SubstratePlanning => f.write_str("substrate_planning"),
            Self::SubstrateApplying => f.write_str("substrate_applying"),
            Self::SubstrateComplete => f.write_str("substrate_complete"),
            Self::WorkloadPlanning => f.write_str("workload_planning"),
            Self::WorkloadApplying => f.write_str("workload_applying"),
            Self::Done => f.write_str("done"),
            Self::Failed(phase) => write!(f, "failed({phase})"),
        }
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: DeployState) -> Vec<DeployState> {
    use DeployState::*;
    match from {
        Init => vec![SubstratePlanning],
        SubstratePlanning => vec![SubstrateApplying],
        SubstrateApplying => vec![SubstrateComplete, Failed(Phase::Substrate)],
        SubstrateComplete => vec![WorkloadPlanning, Failed(Phase::Substrate)],
        WorkloadPlanning => vec![WorkloadApplying],
        WorkloadApplying => vec![Done, Failed(Phase::Workload)],
        Done | Failed(_) => vec![],
    }
}

/// Validate one transition against the table
///
/// # Errors
/// `DeployError::IllegalTransition` if `to` is not reachable from `from`.
pub fn validate_transition(from: DeployState, to: DeployState) -> Result<(), DeployError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(DeployError::IllegalTransition { from, to })
    }
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// Previous state
    pub from: DeployState,
    /// New state
    pub to: DeployState,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Current state plus the history of a run
#[derive(Debug, Clone)]
pub(crate) struct StateTracker {
    current: DeployState,
    history: Vec<Transition>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            current: DeployState::Init,
            history: Vec::new(),
        }
    }

    pub(crate) fn current(&self) -> DeployState {
        self.current
    }

    pub(crate) fn advance(&mut self, to: DeployState) -> Result<(), DeployError> {
        let from = self.current;
        validate_transition(from, to)?;
        tracing::info!(%from, %to, "deploy state transition");
        self.history.push(Transition {
            from,
            to,
            at: Utc::now(),
        });
        self.current = to;
        Ok(())
    }

    pub(crate) fn into_history(self) -> Vec<Transition> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = DeployState> {
        prop_oneof![
            Just(DeployState::Init),
            Just(DeployState::SubstratePlanning),
            Just(DeployState::SubstrateApplying),
            Just(DeployState::SubstrateComplete),
            Just(DeployState::WorkloadPlanning),
            Just(DeployState::WorkloadApplying),
            Just(DeployState::Done),
            Just(DeployState::Failed(Phase::Substrate)),
            Just(DeployState::Failed(Phase::Workload)),
        ]
    }

    #[test]
    fn happy_path_is_legal() {
        let mut tracker = StateTracker::new();
        for to in [
            DeployState::SubstratePlanning,
            DeployState::SubstrateApplying,
            DeployState::SubstrateComplete,
            DeployState::WorkloadPlanning,
            DeployState::WorkloadApplying,
            DeployState::Done,
        ] {
            tracker.advance(to).unwrap();
        }
        assert_eq!(tracker.current(), DeployState::Done);
        assert_eq!(tracker.into_history().len(), 6);
    }

    #[test]
    fn cannot_skip_substrate() {
        assert!(matches!(
            validate_transition(DeployState::Init, DeployState::WorkloadApplying),
            Err(DeployError::IllegalTransition { .. })
        ));
        assert!(
            validate_transition(DeployState::SubstrateApplying, DeployState::WorkloadPlanning)
                .is_err()
        );
    }

    #[test]
    fn failure_phase_must_match() {
        let (substrate, workload) = (DeployState::SubstrateApplying, DeployState::WorkloadApplying);
        assert!(validate_transition(substrate, DeployState::Failed(Phase::Substrate)).is_ok());
        assert!(validate_transition(substrate, DeployState::Failed(Phase::Workload)).is_err());
        assert!(validate_transition(workload, DeployState::Failed(Phase::Workload)).is_ok());
    }

    #[test]
    fn rejected_transition_leaves_state_unchanged() {
        let mut tracker = StateTracker::new();
        assert!(tracker.advance(DeployState::Done).is_err());
        assert_eq!(tracker.current(), DeployState::Init);
    }

    proptest! {
        #[test]
        fn prop_validate_matches_table(from in any_state(), to in any_state()) {
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }

        #[test]
        fn prop_terminal_states_have_no_exits(to in any_state()) {
            prop_assert!(validate_transition(DeployState::Done, to).is_err());
            prop_assert!(validate_transition(DeployState::Failed(Phase::Workload), to).is_err());
        }
    }
}
