//! Deployment plans: ordered batches of nodes.
//!
//! Batch `n` holds every planned node whose planned dependencies all sit in
//! batches `< n` (longest-path layering). Nodes in one batch have no edges
//! between them and may be provisioned concurrently.

use crate::graph::{ResourceGraph, ResourceNode};
use crate::types::NodeId;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Ordered sequence of concurrently-safe batches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    batches: Vec<Vec<NodeId>>,
}

impl DeploymentPlan {
    pub(crate) fn layered(graph: &ResourceGraph, include: impl Fn(&ResourceNode) -> bool) -> Self {
        let planned: Vec<&ResourceNode> = graph.nodes().filter(|n| include(n)).collect();
        let mut placed: HashMap<&NodeId, usize> = HashMap::with_capacity(planned.len());
        let mut remaining = planned;
        let mut batches: Vec<Vec<NodeId>> = Vec::new();

        while !remaining.is_empty() {
            let index = batches.len();
            let (ready, blocked): (Vec<&ResourceNode>, Vec<&ResourceNode>) =
                remaining.into_iter().partition(|node| {
                    graph.dependencies(node.id()).into_iter().all(|dep| {
                        let in_plan = graph.node(dep).is_some_and(|d| include(d));
                        !in_plan || placed.get(dep).is_some_and(|b| *b < index)
                    })
                });

            // Unreachable for a validated graph: a stalled round means a cycle
            if ready.is_empty() {
                debug_assert!(blocked.is_empty(), "acyclic graph cannot stall layering");
                break;
            }

            for node in &ready {
                placed.insert(node.id(), index);
            }
            batches.push(ready.into_iter().map(|n| n.id().clone()).collect());
            remaining = blocked;
        }

        Self { batches }
    }

    /// Build a plan from explicit batches
    #[must_use]
    pub fn from_batches(batches: Vec<Vec<NodeId>>) -> Self {
        Self { batches }
    }

    /// Batches in execution order
    #[inline]
    #[must_use]
    pub fn batches(&self) -> &[Vec<NodeId>] {
        &self.batches
    }

    /// Number of batches
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Whether the plan has no batches
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of planned nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Batch index holding `id`
    #[must_use]
    pub fn batch_of(&self, id: &NodeId) -> Option<usize> {
        self.batches.iter().position(|batch| batch.contains(id))
    }

    /// Planned node ids in execution order
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.batches.iter().flatten()
    }

    /// Same batches in reverse order, for teardown
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            batches: self.batches.iter().rev().cloned().collect(),
        }
    }

    /// Whether every graph edge between planned nodes goes from an earlier
    /// batch to a strictly later one
    #[must_use]
    pub fn respects(&self, graph: &ResourceGraph) -> bool {
        graph.edges().iter().all(|edge| {
            match (self.batch_of(&edge.from), self.batch_of(&edge.to)) {
                (Some(from), Some(to)) => from < to,
                _ => true,
            }
        })
    }

    /// Stable digest of the plan and the declarations it covers.
    ///
    /// Two runs over unchanged declarations produce the same fingerprint.
    #[must_use]
    pub fn fingerprint(&self, graph: &ResourceGraph) -> String {
        let mut hasher = Sha256::new();
        for (index, batch) in self.batches.iter().enumerate() {
            hasher.update((index as u64).to_le_bytes());
            for id in batch {
                hasher.update(id.as_str().as_bytes());
                hasher.update([0]);
                if let Some(node) = graph.node(id) {
                    // Serializing owned data with string keys cannot fail
                    let encoded = serde_json::to_vec(node).unwrap_or_default();
                    hasher.update(&encoded);
                }
                hasher.update([0]);
            }
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use crate::{GraphBuilder, NodeId, Phase, ResourceDecl, Value};
    use pretty_assertions::assert_eq;

    fn ids(batches: &[&[&str]]) -> Vec<Vec<NodeId>> {
        batches
            .iter()
            .map(|b| b.iter().map(|id| NodeId::new(*id)).collect())
            .collect()
    }

    #[test]
    fn role_then_policy() {
        let mut builder = GraphBuilder::new();
        builder.add_node(ResourceDecl::new("R", "iam.role"));
        builder.add_node(ResourceDecl::new("P", "iam.policy").attach_to("R"));
        let graph = builder.build().unwrap();

        let plan = graph.plan();
        assert_eq!(plan.batches(), ids(&[&["R"], &["P"]]).as_slice());
        assert!(plan.respects(&graph));
    }

    #[test]
    fn independent_nodes_share_a_batch_in_declaration_order() {
        let mut builder = GraphBuilder::new();
        builder.add_node(ResourceDecl::new("vpc", "ec2.vpc"));
        builder.add_node(ResourceDecl::new("role", "iam.role"));
        builder.add_node(
            ResourceDecl::new("cluster", "eks.cluster")
                .property("vpc", Value::reference("vpc", "id"))
                .property("role", Value::reference("role", "arn")),
        );
        builder.add_node(ResourceDecl::new("repo", "ecr.repository"));
        let graph = builder.build().unwrap();

        assert_eq!(
            graph.plan().batches(),
            ids(&[&["vpc", "role", "repo"], &["cluster"]]).as_slice()
        );
    }

    #[test]
    fn longest_path_layering() {
        let mut builder = GraphBuilder::new();
        builder.add_node(ResourceDecl::new("a", "t"));
        builder.add_node(ResourceDecl::new("b", "t").requires("a"));
        builder.add_node(ResourceDecl::new("c", "t").requires("a").requires("b"));
        let graph = builder.build().unwrap();

        assert_eq!(graph.plan().batches(), ids(&[&["a"], &["b"], &["c"]]).as_slice());
    }

    #[test]
    fn phase_plans_ignore_earlier_phase_dependencies() {
        let mut builder = GraphBuilder::new();
        builder.add_node(ResourceDecl::new("cluster", "eks.cluster"));
        builder.add_node(ResourceDecl::new("nodegroup", "eks.nodegroup").requires("cluster"));
        builder.add_node(
            ResourceDecl::workload("autoscaler", "k8s.manifest", "cluster").attach_to("nodegroup"),
        );
        builder.add_node(ResourceDecl::workload("ingress", "k8s.helm_chart", "cluster"));
        let graph = builder.build().unwrap();

        let substrate = graph.plan_phase(Phase::Substrate);
        let workload = graph.plan_phase(Phase::Workload);
        assert_eq!(substrate.batches(), ids(&[&["cluster"], &["nodegroup"]]).as_slice());
        assert_eq!(workload.batches(), ids(&[&["autoscaler", "ingress"]]).as_slice());
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive_to_properties() {
        let declare = |size: u64| {
            let mut builder = GraphBuilder::new();
            builder.add_node(ResourceDecl::new("ng", "eks.nodegroup").property("max_size", size));
            builder.build().unwrap()
        };
        let a = declare(80);
        let b = declare(80);
        let c = declare(40);
        assert_eq!(a.plan().fingerprint(&a), b.plan().fingerprint(&b));
        assert_ne!(a.plan().fingerprint(&a), c.plan().fingerprint(&c));
    }

    #[test]
    fn reversed_plan_for_teardown() {
        let mut builder = GraphBuilder::new();
        builder.add_node(ResourceDecl::new("R", "iam.role"));
        builder.add_node(ResourceDecl::new("P", "iam.policy").attach_to("R"));
        let graph = builder.build().unwrap();
        assert_eq!(graph.plan().reversed().batches(), ids(&[&["P"], &["R"]]).as_slice());
    }
}
