//! Batch scheduler.
//!
//! Runs a [`DeploymentPlan`] one batch at a time. Nodes inside a batch are
//! driven concurrently, bounded by `max_concurrency`. Attributes of a batch
//! are published to the [`AttributeStore`] only after every node of the
//! batch has finished, so no task ever observes a sibling's result.
//!
//! A failed node stops the run after its batch: siblings already in flight
//! finish and keep their attributes, later batches never start. There are
//! no automatic retries.

use crate::capability::{LiveAttributes, Provisioner};
use crate::error::{FailureCause, NodeFailure, ResolveError};
use crate::executor::NodeExecutor;
use crate::redact::redact_properties;
use crate::resolver::{AttributeStore, Resolver};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use strata_graph::{DeploymentPlan, NodeId, Phase, ResourceGraph, ResourceNode, ResourceType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How a phase ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Every batch finished
    Completed {
        /// Nodes handled, in plan order
        completed: Vec<NodeId>,
    },
    /// A batch had at least one failed node
    Failed {
        /// Index of the failed batch
        batch: usize,
        /// Failed nodes of that batch
        failures: Vec<NodeFailure>,
        /// Nodes handled before the run stopped, including batch siblings
        completed: Vec<NodeId>,
    },
    /// Cancellation was observed before a batch started
    Cancelled {
        /// Index of the batch that did not start
        next_batch: usize,
        /// Nodes handled before the run stopped
        completed: Vec<NodeId>,
    },
}

impl PhaseOutcome {
    /// Nodes handled during the phase
    #[must_use]
    pub fn completed(&self) -> &[NodeId] {
        match self {
            Self::Completed { completed }
            | Self::Failed { completed, .. }
            | Self::Cancelled { completed, .. } => completed,
        }
    }

    /// Whether every batch finished
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Batch scheduler
#[derive(Debug, Clone)]
pub struct Scheduler {
    max_concurrency: usize,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler; `max_concurrency` of zero is treated as one
    #[must_use]
    pub fn new(max_concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            cancel,
        }
    }

    /// Realize every node of `plan`, recording live attributes in `store`
    ///
    /// # Errors
    /// A [`ResolveError`] means an internal invariant broke (a reference to
    /// a node that is not live yet, or a plan that does not match the graph).
    /// Collaborator failures are reported through [`PhaseOutcome::Failed`].
    #[instrument(skip_all, fields(batches = plan.len(), nodes = plan.node_count()))]
    pub async fn apply(
        &self,
        graph: &ResourceGraph,
        plan: &DeploymentPlan,
        executor: &dyn NodeExecutor,
        store: &mut AttributeStore,
    ) -> Result<PhaseOutcome, ResolveError> {
        let mut completed = Vec::with_capacity(plan.node_count());

        for (index, batch) in plan.batches().iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(next_batch = index, "cancelled before batch");
                return Ok(PhaseOutcome::Cancelled {
                    next_batch: index,
                    completed,
                });
            }

            // Resolve the whole batch before any call goes out
            let mut work: Vec<(&ResourceNode, _)> = Vec::with_capacity(batch.len());
            for id in batch {
                let node = graph
                    .node(id)
                    .ok_or_else(|| ResolveError::UnknownNode(id.clone()))?;
                let properties = Resolver::resolve(node, store)?;
                debug!(node = %id, properties = %redact_properties(&properties), "resolved");
                work.push((node, properties));
            }

            info!(batch = index, size = batch.len(), "starting batch");
            let mut results: HashMap<&NodeId, Result<LiveAttributes, FailureCause>> =
                stream::iter(work)
                    .map(|(node, properties)| async move {
                        (node.id(), executor.realize(node, properties).await)
                    })
                    .buffer_unordered(self.max_concurrency)
                    .collect()
                    .await;

            // Publish barrier: record in plan order once the batch is done
            let mut failures = Vec::new();
            for id in batch {
                match results.remove(id) {
                    Some(Ok(attributes)) => {
                        debug!(node = %id, "live");
                        store.record(id.clone(), attributes)?;
                        completed.push(id.clone());
                    }
                    Some(Err(cause)) => {
                        let failure = node_failure(graph, id, cause);
                        warn!(batch = index, "{failure}");
                        failures.push(failure);
                    }
                    None => return Err(ResolveError::NotLive(id.clone())),
                }
            }

            if !failures.is_empty() {
                return Ok(PhaseOutcome::Failed {
                    batch: index,
                    failures,
                    completed,
                });
            }
        }

        info!(nodes = completed.len(), "phase complete");
        Ok(PhaseOutcome::Completed { completed })
    }

    /// Delete the substrate nodes of `plan` batch by batch.
    ///
    /// Pass a reversed plan so dependents go before their dependencies.
    /// Workload nodes are skipped; they are removed with their cluster.
    ///
    /// # Errors
    /// `ResolveError::UnknownNode` if the plan names a node the graph lacks.
    #[instrument(skip_all, fields(batches = plan.len()))]
    pub async fn destroy(
        &self,
        graph: &ResourceGraph,
        plan: &DeploymentPlan,
        provisioner: &dyn Provisioner,
    ) -> Result<PhaseOutcome, ResolveError> {
        let mut completed = Vec::new();

        for (index, batch) in plan.batches().iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(next_batch = index, "cancelled before batch");
                return Ok(PhaseOutcome::Cancelled {
                    next_batch: index,
                    completed,
                });
            }

            let mut targets = Vec::with_capacity(batch.len());
            for id in batch {
                let node = graph
                    .node(id)
                    .ok_or_else(|| ResolveError::UnknownNode(id.clone()))?;
                if node.phase() == Phase::Substrate {
                    targets.push(node);
                }
            }

            let results: Vec<(&NodeId, Result<(), FailureCause>)> = stream::iter(targets)
                .map(|node| async move {
                    let result = provisioner
                        .delete(node.id(), node.resource_type())
                        .await
                        .map_err(FailureCause::from);
                    (node.id(), result)
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

            let mut failures = Vec::new();
            let mut deleted: HashMap<&NodeId, Result<(), FailureCause>> =
                results.into_iter().collect();
            for id in batch {
                match deleted.remove(id) {
                    Some(Ok(())) => {
                        debug!(node = %id, "deleted");
                        completed.push(id.clone());
                    }
                    Some(Err(cause)) => {
                        let failure = node_failure(graph, id, cause);
                        warn!(batch = index, "{failure}");
                        failures.push(failure);
                    }
                    None => {}
                }
            }

            if !failures.is_empty() {
                return Ok(PhaseOutcome::Failed {
                    batch: index,
                    failures,
                    completed,
                });
            }
        }

        Ok(PhaseOutcome::Completed { completed })
    }
}

fn node_failure(graph: &ResourceGraph, id: &NodeId, cause: FailureCause) -> NodeFailure {
    let (resource_type, phase) = graph.node(id).map_or_else(
        || (ResourceType::new("unknown"), Phase::default()),
        |n| (n.resource_type().clone(), n.phase()),
    );
    NodeFailure {
        node: id.clone(),
        resource_type,
        phase,
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ConcreteProperties, ProviderError};
    use parking_lot::Mutex;
    use serde_json::json;
    use strata_graph::{GraphBuilder, ResourceDecl, Value};

    /// Echoes properties plus an `id`; fails the nodes listed in `fail`
    #[derive(Default)]
    struct EchoExecutor {
        fail: Vec<NodeId>,
        calls: Mutex<Vec<NodeId>>,
    }

    #[async_trait::async_trait]
    impl NodeExecutor for EchoExecutor {
        async fn realize(
            &self,
            node: &ResourceNode,
            properties: ConcreteProperties,
        ) -> Result<LiveAttributes, FailureCause> {
            self.calls.lock().push(node.id().clone());
            if self.fail.contains(node.id()) {
                return Err(ProviderError::new("boom").into());
            }
            let mut attrs = properties;
            attrs.insert("id".into(), json!(format!("{}-id", node.id())));
            Ok(attrs)
        }
    }

    fn chain() -> ResourceGraph {
        let mut builder = GraphBuilder::new();
        builder.add_node(ResourceDecl::new("a", "t"));
        for (id, parent) in [("b", "a"), ("c", "b")] {
            builder.add_node(
                ResourceDecl::new(id, "t").property("parent", Value::reference(parent, "id")),
            );
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn resolves_references_across_batches() {
        let graph = chain();
        let executor = EchoExecutor::default();
        let mut store = AttributeStore::new();
        let outcome = Scheduler::new(4, CancellationToken::new())
            .apply(&graph, &graph.plan(), &executor, &mut store)
            .await
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(store.attribute(&NodeId::new("c"), "parent"), Some(&json!("b-id")));
        assert_eq!(outcome.completed().len(), 3);
    }

    #[tokio::test]
    async fn failure_stops_after_batch() {
        let graph = chain();
        let executor = EchoExecutor {
            fail: vec![NodeId::new("b")],
            ..Default::default()
        };
        let mut store = AttributeStore::new();
        let outcome = Scheduler::new(4, CancellationToken::new())
            .apply(&graph, &graph.plan(), &executor, &mut store)
            .await
            .unwrap();

        match outcome {
            PhaseOutcome::Failed { batch, failures, completed } => {
                assert_eq!(batch, 1);
                assert_eq!(failures[0].node, NodeId::new("b"));
                assert_eq!(completed, vec![NodeId::new("a")]);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!executor.calls.lock().contains(&NodeId::new("c")));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_batch() {
        let graph = chain();
        let executor = EchoExecutor::default();
        let token = CancellationToken::new();
        token.cancel();
        let mut store = AttributeStore::new();
        let outcome = Scheduler::new(1, token)
            .apply(&graph, &graph.plan(), &executor, &mut store)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PhaseOutcome::Cancelled {
                next_batch: 0,
                completed: vec![]
            }
        );
        assert!(executor.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn plan_out_of_step_with_store_is_an_invariant_error() {
        let graph = chain();
        let executor = EchoExecutor::default();
        let mut store = AttributeStore::new();
        // "b" before "a": its reference cannot be resolved yet
        let plan =
            DeploymentPlan::from_batches(vec![vec![NodeId::new("b")], vec![NodeId::new("a")]]);
        let result = Scheduler::new(1, CancellationToken::new())
            .apply(&graph, &plan, &executor, &mut store)
            .await;

        assert!(matches!(result, Err(ResolveError::UnresolvedReference { .. })));
        assert!(executor.calls.lock().is_empty());
    }
}
