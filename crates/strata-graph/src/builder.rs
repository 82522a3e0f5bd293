//! Graph Builder
//!
//! Collects declarations and turns them into a validated [`ResourceGraph`].
//! Edges are induced, never added by hand:
//! - every attribute reference adds `referenced -> referencing`
//! - every ordering hint adds `target -> declaring`
//! - a workload node's target cluster adds `cluster -> workload`

use crate::declaration::ResourceDecl;
use crate::error::GraphError;
use crate::graph::{Edge, EdgeKind, ResourceGraph, ResourceNode};
use crate::types::{NodeId, Phase, Relation};
use indexmap::IndexMap;

/// Builder for resource graphs
///
/// Usage:
/// ```rust,ignore
/// let mut builder = GraphBuilder::new();
/// let role = builder.add_node(ResourceDecl::new("R", "iam.role"));
/// builder.add_node(ResourceDecl::new("P", "iam.policy").attach_to(role));
/// let graph = builder.build()?;
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    decls: Vec<ResourceDecl>,
}

impl GraphBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration and return its id.
    ///
    /// Problems with the declaration are reported by [`GraphBuilder::build`].
    pub fn add_node(&mut self, decl: ResourceDecl) -> NodeId {
        let id = decl.id.clone();
        self.decls.push(decl);
        id
    }

    /// Add every declaration from an iterator
    pub fn extend(&mut self, decls: impl IntoIterator<Item = ResourceDecl>) {
        self.decls.extend(decls);
    }

    /// Number of declarations added so far
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.decls.len()
    }

    /// Look up a declaration by id
    #[must_use]
    pub fn get_node(&self, id: &NodeId) -> Option<&ResourceDecl> {
        self.decls.iter().find(|d| &d.id == id)
    }

    /// Validate the declarations and produce a graph.
    ///
    /// # Errors
    /// Checks run in this order, stopping at the first failure:
    /// duplicate ids, dangling references, unbound template placeholders,
    /// workload cluster targets, cycles, phase inversions.
    pub fn build(self) -> Result<ResourceGraph, GraphError> {
        let mut nodes: IndexMap<NodeId, ResourceNode> = IndexMap::with_capacity(self.decls.len());
        for decl in self.decls {
            if nodes.contains_key(&decl.id) {
                return Err(GraphError::DuplicateNode(decl.id));
            }
            nodes.insert(decl.id.clone(), ResourceNode::from_decl(decl));
        }

        let edges = induce_edges(&nodes)?;
        check_placeholders(&nodes)?;
        check_clusters(&nodes)?;

        ResourceGraph::assemble(nodes, edges)
    }
}

fn induce_edges(nodes: &IndexMap<NodeId, ResourceNode>) -> Result<Vec<Edge>, GraphError> {
    let mut edges = Vec::new();
    for node in nodes.values() {
        let references = node.properties().values().flat_map(|v| v.references());
        for reference in references {
            if !nodes.contains_key(&reference.node) {
                return Err(GraphError::DanglingReference {
                    node: node.id().clone(),
                    target: reference.node.clone(),
                    attribute: Some(reference.attribute.clone()),
                });
            }
            edges.push(Edge {
                from: reference.node.clone(),
                to: node.id().clone(),
                kind: EdgeKind::Reference,
            });
        }

        let hints = node.ordering().iter().map(|h| {
            let kind = match h.relation {
                Relation::AttachesTo => EdgeKind::AttachesTo,
                Relation::Requires => EdgeKind::Requires,
            };
            (&h.target, kind)
        });
        let cluster = node.cluster().map(|c| (c, EdgeKind::Requires));
        for (target, kind) in hints.chain(cluster) {
            if !nodes.contains_key(target) {
                return Err(GraphError::DanglingReference {
                    node: node.id().clone(),
                    target: target.clone(),
                    attribute: None,
                });
            }
            edges.push(Edge {
                from: target.clone(),
                to: node.id().clone(),
                kind,
            });
        }
    }
    Ok(edges)
}

fn check_placeholders(nodes: &IndexMap<NodeId, ResourceNode>) -> Result<(), GraphError> {
    for node in nodes.values() {
        for template in node.templates() {
            if let Some(token) = template.unbound().next() {
                return Err(GraphError::UnboundPlaceholder {
                    node: node.id().clone(),
                    token: token.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_clusters(nodes: &IndexMap<NodeId, ResourceNode>) -> Result<(), GraphError> {
    for node in nodes.values().filter(|n| n.phase() == Phase::Workload) {
        let Some(cluster) = node.cluster() else {
            return Err(GraphError::MissingCluster {
                node: node.id().clone(),
            });
        };
        let is_substrate = nodes
            .get(cluster)
            .is_some_and(|c| c.phase() == Phase::Substrate);
        if !is_substrate {
            return Err(GraphError::ClusterNotSubstrate {
                node: node.id().clone(),
                cluster: cluster.clone(),
            });
        }
    }
    Ok(())
}
