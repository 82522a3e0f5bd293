//! Validated resource graph.
//!
//! A [`ResourceGraph`] is only produced by [`crate::GraphBuilder::build`],
//! so holding one means the edge set is acyclic, every reference names an
//! existing node and no substrate node depends on a workload node.

use crate::declaration::ResourceDecl;
use crate::error::GraphError;
use crate::plan::DeploymentPlan;
use crate::template::Template;
use crate::types::{NodeId, OrderingHint, Phase, ResourceType};
use crate::value::Value;
use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Why an edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// A property references an attribute of the source node
    Reference,
    /// The target attaches to the source
    AttachesTo,
    /// The target requires the source to exist
    Requires,
}

/// Directed edge: `from` is realized before `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    /// Dependency
    pub from: NodeId,
    /// Dependent
    pub to: NodeId,
    /// Reason for the edge
    pub kind: EdgeKind,
}

/// Immutable node held by a built graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceNode {
    id: NodeId,
    resource_type: ResourceType,
    phase: Phase,
    properties: BTreeMap<String, Value>,
    ordering: Vec<OrderingHint>,
    cluster: Option<NodeId>,
}

impl ResourceNode {
    pub(crate) fn from_decl(decl: ResourceDecl) -> Self {
        Self {
            id: decl.id,
            resource_type: decl.resource_type,
            phase: decl.phase,
            properties: decl.properties,
            ordering: decl.ordering,
            cluster: decl.cluster,
        }
    }

    /// Node id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Provider resource type
    #[inline]
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Deployment phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Declared properties
    #[inline]
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Declared ordering hints
    #[inline]
    #[must_use]
    pub fn ordering(&self) -> &[OrderingHint] {
        &self.ordering
    }

    /// Target cluster of a workload node
    #[inline]
    #[must_use]
    pub fn cluster(&self) -> Option<&NodeId> {
        self.cluster.as_ref()
    }

    /// Every template held in the properties
    #[must_use]
    pub fn templates(&self) -> Vec<&Template> {
        self.properties.values().flat_map(Value::templates).collect()
    }
}

/// Acyclic dependency graph over resource nodes
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    nodes: IndexMap<NodeId, ResourceNode>,
    inner: DiGraph<NodeId, EdgeKind>,
}

impl ResourceGraph {
    /// Assemble nodes and edges, then reject cycles and phase inversions.
    ///
    /// Node indexes in `inner` match insertion order in `nodes`.
    pub(crate) fn assemble(
        nodes: IndexMap<NodeId, ResourceNode>,
        edges: Vec<Edge>,
    ) -> Result<Self, GraphError> {
        let mut inner = DiGraph::with_capacity(nodes.len(), edges.len());
        for id in nodes.keys() {
            inner.add_node(id.clone());
        }

        let mut graph = Self { nodes, inner };
        for edge in edges {
            let (Some(from), Some(to)) = (graph.index_of(&edge.from), graph.index_of(&edge.to))
            else {
                return Err(GraphError::DanglingReference {
                    node: edge.to,
                    target: edge.from,
                    attribute: None,
                });
            };
            if graph.inner.find_edge(from, to).is_none() {
                graph.inner.add_edge(from, to, edge.kind);
            }
        }

        if let Some(path) = graph.find_cycle() {
            return Err(GraphError::Cycle { path });
        }
        graph.check_phases()?;
        Ok(graph)
    }

    fn index_of(&self, id: &NodeId) -> Option<NodeIndex> {
        self.nodes.get_index_of(id).map(NodeIndex::new)
    }

    fn id_at(&self, index: NodeIndex) -> &NodeId {
        &self.inner[index]
    }

    /// Locate one concrete cycle, if any, as a closed path of node ids
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        for component in tarjan_scc(&self.inner) {
            if component.len() == 1 {
                let only = component[0];
                if self.inner.contains_edge(only, only) {
                    let id = self.id_at(only).clone();
                    return Some(vec![id.clone(), id]);
                }
                continue;
            }

            let Some(&start) = component.iter().min() else {
                continue;
            };
            let members: HashSet<NodeIndex> = component.iter().copied().collect();
            let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
            let mut queue = VecDeque::from([start]);
            let mut seen = HashSet::from([start]);

            while let Some(current) = queue.pop_front() {
                for next in self.inner.neighbors_directed(current, Direction::Outgoing) {
                    if !members.contains(&next) {
                        continue;
                    }
                    if next == start {
                        let mut path = vec![current];
                        let mut cursor = current;
                        while let Some(&prev) = parent.get(&cursor) {
                            path.push(prev);
                            cursor = prev;
                        }
                        path.reverse();
                        path.push(start);
                        return Some(path.into_iter().map(|i| self.id_at(i).clone()).collect());
                    }
                    if seen.insert(next) {
                        parent.insert(next, current);
                        queue.push_back(next);
                    }
                }
            }
        }
        None
    }

    fn check_phases(&self) -> Result<(), GraphError> {
        for edge in self.inner.edge_references() {
            let from = &self.nodes[edge.source().index()];
            let to = &self.nodes[edge.target().index()];
            if to.phase == Phase::Substrate && from.phase == Phase::Workload {
                return Err(GraphError::PhaseInversion {
                    node: to.id.clone(),
                    dependency: from.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of distinct edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Look up a node
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Whether a node exists
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Nodes of one phase, in declaration order
    pub fn nodes_in_phase(&self, phase: Phase) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values().filter(move |n| n.phase == phase)
    }

    /// Direct dependencies of a node, in declaration order
    #[must_use]
    pub fn dependencies(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a node, in declaration order
    #[must_use]
    pub fn dependents(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<&NodeId> {
        let Some(index) = self.index_of(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.inner.neighbors_directed(index, direction).collect();
        found.sort_unstable();
        found.dedup();
        found.into_iter().map(|i| self.id_at(i)).collect()
    }

    /// Every edge, ordered by dependent then dependency declaration order
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<(NodeIndex, NodeIndex, EdgeKind)> = self
            .inner
            .edge_references()
            .map(|e| (e.source(), e.target(), *e.weight()))
            .collect();
        edges.sort_unstable_by_key(|(from, to, _)| (*to, *from));
        edges
            .into_iter()
            .map(|(from, to, kind)| Edge {
                from: self.id_at(from).clone(),
                to: self.id_at(to).clone(),
                kind,
            })
            .collect()
    }

    /// Topological batches over every node
    #[must_use]
    pub fn plan(&self) -> DeploymentPlan {
        DeploymentPlan::layered(self, |_| true)
    }

    /// Topological batches over the nodes of one phase.
    ///
    /// Dependencies in an earlier phase are treated as already satisfied.
    #[must_use]
    pub fn plan_phase(&self, phase: Phase) -> DeploymentPlan {
        DeploymentPlan::layered(self, |node| node.phase == phase)
    }
}
