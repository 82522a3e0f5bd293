//! Error types for the deploy engine.
//!
//! Two families:
//! - fatal errors ([`DeployError`], [`ResolveError`]) abort a run and are
//!   returned as `Err`
//! - collaborator failures ([`FailureCause`], [`NodeFailure`]) end a run with
//!   a failed status that names the node, its type and its phase

use crate::capability::{ApplyError, ProviderError, StoreError};
use crate::state_machine::DeployState;
use strata_graph::{AttrRef, GraphError, NodeId, Phase, ResourceType};
use thiserror::Error;

/// Reference resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A referenced attribute has not been recorded
    #[error("node `{node}` references `{target}.{attribute}`, which is not resolved")]
    UnresolvedReference {
        /// Referencing node
        node: NodeId,
        /// Referenced node
        target: NodeId,
        /// Referenced attribute
        attribute: String,
    },

    /// A node's attributes were recorded twice in one run
    #[error("attributes of node `{0}` were already recorded in this run")]
    AlreadyResolved(NodeId),

    /// A plan names a node the graph does not hold
    #[error("plan names node `{0}`, which is not in the graph")]
    UnknownNode(NodeId),

    /// A phase completed without recording one of its nodes
    #[error("node `{0}` completed without being recorded as live")]
    NotLive(NodeId),
}

/// Why a node (or an output bound to it) failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    /// Provider API refused or failed the call
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Cluster API refused or failed the apply
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Secret store refused the value
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A target cluster has no usable connection after the substrate phase
    #[error("cluster `{cluster}` is unreachable: attribute `{attribute}` is not resolved")]
    ClusterUnreachable {
        /// Cluster node
        cluster: NodeId,
        /// Missing connection attribute
        attribute: String,
    },

    /// The run was cancelled before the node started
    #[error("run cancelled")]
    Cancelled,
}

impl FailureCause {
    /// Whether re-running apply may succeed without changing declarations
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.retryable,
            Self::Apply(e) => e.retryable,
            Self::Store(_) | Self::ClusterUnreachable { .. } | Self::Cancelled => false,
        }
    }
}

/// Failure attributed to one node
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{resource_type} `{node}` failed in the {phase} phase: {cause}")]
pub struct NodeFailure {
    /// Node id
    pub node: NodeId,
    /// Resource type
    pub resource_type: ResourceType,
    /// Phase the node belongs to
    pub phase: Phase,
    /// Underlying cause
    pub cause: FailureCause,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config file `{path}`: {message}")]
    Io {
        /// File path
        path: String,
        /// OS error text
        message: String,
    },

    /// TOML could not be parsed
    #[error("malformed config: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fatal deploy errors.
///
/// These are returned before any side effect (graph and output spec
/// problems) or signal a broken internal invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    /// Declarations do not form a valid graph
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Internal resolution invariant broken
    #[error("invariant violated: {0}")]
    Invariant(#[from] ResolveError),

    /// State machine table refused a transition
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: DeployState,
        /// Requested state
        to: DeployState,
    },

    /// An output spec names a node that is not declared
    #[error("output `{output}` reads from undeclared node `{node}`")]
    UnknownOutputSource {
        /// Output name
        output: String,
        /// Missing node
        node: NodeId,
    },

    /// A plain output or companion reads the attribute of a sensitive output
    #[error("plain output `{output}` exposes `{attribute}` of sensitive output `{sensitive}`")]
    SensitiveSourceExposed {
        /// Plain output name
        output: String,
        /// Sensitive output reading the same attribute
        sensitive: String,
        /// Shared source attribute
        attribute: AttrRef,
    },

    /// An output reads an attribute that was never resolved
    #[error("output `{output}` reads `{attribute}`, which is not resolved")]
    UnresolvedOutput {
        /// Output name
        output: String,
        /// Attribute the output reads
        attribute: AttrRef,
    },

    /// Invalid engine configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_failure_names_node_type_and_phase() {
        let failure = NodeFailure {
            node: NodeId::new("nodegroup"),
            resource_type: ResourceType::new("eks.nodegroup"),
            phase: Phase::Substrate,
            cause: ProviderError::new("quota exceeded").into(),
        };
        assert_eq!(
            failure.to_string(),
            "eks.nodegroup `nodegroup` failed in the substrate phase: provider error: quota exceeded"
        );
    }

    #[test]
    fn retryable_follows_collaborator_flag() {
        assert!(FailureCause::from(ProviderError::retryable("throttled")).is_retryable());
        assert!(!FailureCause::from(ApplyError::new("invalid manifest")).is_retryable());
        assert!(!FailureCause::Cancelled.is_retryable());
    }

    #[test]
    fn illegal_transition_display() {
        let err = DeployError::IllegalTransition {
            from: DeployState::Init,
            to: DeployState::Done,
        };
        assert_eq!(err.to_string(), "illegal state transition init -> done");
    }
}
