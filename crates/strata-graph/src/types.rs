//! Identifier and classification types shared by every declaration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a resource node, chosen by whoever declares it.
///
/// Ids are unique within one graph; the builder rejects duplicates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&NodeId> for NodeId {
    fn from(value: &NodeId) -> Self {
        value.clone()
    }
}

/// Provider resource type, e.g. `iam.role` or `k8s.manifest`.
///
/// The core treats the type as opaque; only the provisioner interprets it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    /// Create a resource type
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Borrow the type name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Deployment phase a node belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Provider-level resources (network, identity, cluster control plane, registry)
    #[default]
    Substrate,
    /// Resources applied against a live cluster endpoint
    Workload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Substrate => f.write_str("substrate"),
            Phase::Workload => f.write_str("workload"),
        }
    }
}

/// Symbolic pointer to an attribute another node will produce once live
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttrRef {
    /// Node producing the attribute
    pub node: NodeId,
    /// Attribute name in the node's live attributes
    pub attribute: String,
}

impl AttrRef {
    /// Create an attribute reference
    #[inline]
    #[must_use]
    pub fn new(node: impl Into<NodeId>, attribute: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.attribute)
    }
}

/// Declared ordering relation that adds an edge without a literal reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// This node attaches to the target (policy to role, role to manifest)
    AttachesTo,
    /// This node only makes sense once the target exists
    Requires,
}

/// Ordering hint on a declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderingHint {
    /// Node that must be realized first
    pub target: NodeId,
    /// Why the ordering exists
    pub relation: Relation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_ref_display() {
        let r = AttrRef::new("cluster", "endpoint");
        assert_eq!(r.to_string(), "cluster.endpoint");
    }

    #[test]
    fn phase_defaults_to_substrate() {
        assert_eq!(Phase::default(), Phase::Substrate);
        assert_eq!(Phase::Workload.to_string(), "workload");
    }

    #[test]
    fn node_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&NodeId::new("vpc")).unwrap();
        assert_eq!(json, "\"vpc\"");
    }
}
