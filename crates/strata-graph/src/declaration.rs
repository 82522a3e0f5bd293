//! Resource declarations, the input to graph construction.

use crate::types::{AttrRef, NodeId, OrderingHint, Phase, Relation, ResourceType};
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;

/// Declaration of one infrastructure object.
///
/// Declarations are pure data; nothing happens until a built graph is
/// applied.
///
/// ```rust,ignore
/// let role = ResourceDecl::new("worker-role", "iam.role")
///     .property("assumed_by", "ec2.amazonaws.com");
/// let policy = ResourceDecl::new("autoscaler-policy", "iam.policy")
///     .property("roles", Value::list([Value::reference("worker-role", "name")]))
///     .attach_to("worker-role");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDecl {
    /// Node id
    pub id: NodeId,
    /// Provider resource type
    pub resource_type: ResourceType,
    /// Deployment phase
    pub phase: Phase,
    /// Named property values
    pub properties: BTreeMap<String, Value>,
    /// Ordering edges declared without a literal reference
    pub ordering: Vec<OrderingHint>,
    /// Cluster a workload node is applied to
    pub cluster: Option<NodeId>,
}

impl ResourceDecl {
    /// Declare a substrate-phase resource
    #[must_use]
    pub fn new(id: impl Into<NodeId>, resource_type: impl Into<ResourceType>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            phase: Phase::Substrate,
            properties: BTreeMap::new(),
            ordering: Vec::new(),
            cluster: None,
        }
    }

    /// Declare a workload-phase resource applied to `cluster`
    #[must_use]
    pub fn workload(
        id: impl Into<NodeId>,
        resource_type: impl Into<ResourceType>,
        cluster: impl Into<NodeId>,
    ) -> Self {
        Self::new(id, resource_type)
            .with_phase(Phase::Workload)
            .on_cluster(cluster)
    }

    /// Set the phase
    #[must_use]
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Set a property
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Order this node after `target` because it attaches to it
    #[must_use]
    pub fn attach_to(self, target: impl Into<NodeId>) -> Self {
        self.ordered_after(target, Relation::AttachesTo)
    }

    /// Order this node after `target` because it requires it to exist
    #[must_use]
    pub fn requires(self, target: impl Into<NodeId>) -> Self {
        self.ordered_after(target, Relation::Requires)
    }

    /// Target cluster for a workload node
    #[must_use]
    pub fn on_cluster(mut self, cluster: impl Into<NodeId>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    fn ordered_after(mut self, target: impl Into<NodeId>, relation: Relation) -> Self {
        let hint = OrderingHint {
            target: target.into(),
            relation,
        };
        if !self.ordering.contains(&hint) {
            self.ordering.push(hint);
        }
        self
    }

    /// Reference to one of this node's future attributes
    #[must_use]
    pub fn attr(&self, attribute: impl Into<String>) -> Value {
        Value::Reference(AttrRef::new(self.id.clone(), attribute))
    }

    /// Every attribute reference in the properties
    #[must_use]
    pub fn references(&self) -> Vec<&AttrRef> {
        self.properties
            .values()
            .flat_map(Value::references)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_sets_phase_and_cluster() {
        let decl = ResourceDecl::workload("manifest", "k8s.manifest", "cluster");
        assert_eq!(decl.phase, Phase::Workload);
        assert_eq!(decl.cluster, Some(NodeId::new("cluster")));
    }

    #[test]
    fn ordering_hints_are_not_duplicated() {
        let decl = ResourceDecl::new("p", "iam.policy").attach_to("r").attach_to("r");
        assert_eq!(decl.ordering.len(), 1);
        assert_eq!(decl.ordering[0].relation, Relation::AttachesTo);
    }

    #[test]
    fn attr_builds_reference_to_self() {
        let role = ResourceDecl::new("role", "iam.role");
        assert_eq!(role.attr("arn"), Value::reference("role", "arn"));
    }
}
