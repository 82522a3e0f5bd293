//! Graph construction errors.
//!
//! Every variant is fatal: no partially built graph is ever handed out, and
//! construction runs before any side effect.

use crate::types::NodeId;

/// Error returned by [`crate::GraphBuilder::build`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two declarations share an id
    #[error("duplicate node id `{0}`")]
    DuplicateNode(NodeId),

    /// A reference, ordering hint or target cluster names a missing node
    #[error("node `{node}` refers to missing node `{target}`{}", describe_attribute(.attribute))]
    DanglingReference {
        /// Node holding the reference
        node: NodeId,
        /// Node that does not exist
        target: NodeId,
        /// Attribute named by the reference, if it was an attribute reference
        attribute: Option<String>,
    },

    /// A template placeholder has no binding
    #[error("node `{node}` has unbound template placeholder `__{token}__`")]
    UnboundPlaceholder {
        /// Node holding the template
        node: NodeId,
        /// Placeholder name
        token: String,
    },

    /// A workload node does not say which cluster it is applied to
    #[error("workload node `{node}` has no target cluster")]
    MissingCluster {
        /// Workload node
        node: NodeId,
    },

    /// A workload node targets another workload node as its cluster
    #[error("workload node `{node}` targets `{cluster}`, which is not a substrate node")]
    ClusterNotSubstrate {
        /// Workload node
        node: NodeId,
        /// Declared cluster
        cluster: NodeId,
    },

    /// The induced edge set contains a cycle
    #[error("dependency cycle: {}", join_path(.path))]
    Cycle {
        /// Node ids around the cycle; first and last are the same node
        path: Vec<NodeId>,
    },

    /// A substrate node depends on a workload node
    #[error("substrate node `{node}` depends on workload node `{dependency}`")]
    PhaseInversion {
        /// Substrate node
        node: NodeId,
        /// Workload node it depends on
        dependency: NodeId,
    },
}

fn describe_attribute(attribute: &Option<String>) -> String {
    attribute
        .as_deref()
        .map(|a| format!(" (attribute `{a}`)"))
        .unwrap_or_default()
}

fn join_path(path: &[NodeId]) -> String {
    path.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_display_lists_path() {
        let err = GraphError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn dangling_display_names_attribute() {
        let err = GraphError::DanglingReference {
            node: "policy".into(),
            target: "role".into(),
            attribute: Some("arn".into()),
        };
        assert_eq!(
            err.to_string(),
            "node `policy` refers to missing node `role` (attribute `arn`)"
        );

        let hint = GraphError::DanglingReference {
            node: "policy".into(),
            target: "role".into(),
            attribute: None,
        };
        assert_eq!(hint.to_string(), "node `policy` refers to missing node `role`");
    }
}
