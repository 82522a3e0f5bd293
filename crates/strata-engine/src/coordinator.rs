//! Two-phase deploy coordinator.
//!
//! A run builds the graph, applies every substrate node, checks that each
//! target cluster is reachable, applies every workload node against its
//! cluster and finally binds outputs. Workload nodes never start before the
//! whole substrate phase has completed.
//!
//! Graph errors and invariant violations are returned as `Err` before (or
//! instead of) any further side effect. Collaborator failures end the run
//! with [`DeployStatus::Failed`].

use crate::capability::{ClusterApplier, ClusterConnection, Provisioner, SecretStore};
use crate::config::EngineConfig;
use crate::error::{DeployError, NodeFailure, ResolveError};
use crate::executor::{connect, SubstrateExecutor, WorkloadExecutor};
use crate::outputs::{validate_specs, Output, OutputBinder, OutputError, OutputSpec};
use crate::resolver::AttributeStore;
use crate::scheduler::{PhaseOutcome, Scheduler};
use crate::state_machine::{DeployState, StateTracker, Transition};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use strata_graph::{
    DeploymentPlan, GraphBuilder, NodeId, Phase, ResourceDecl, ResourceGraph, ResourceType,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Per-phase plans of one graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhasedPlan {
    /// Provider-level batches
    pub substrate: DeploymentPlan,
    /// In-cluster batches
    pub workload: DeploymentPlan,
    /// Digest of both plans and the declarations they cover
    pub fingerprint: String,
}

impl PhasedPlan {
    /// Plan both phases of a built graph
    #[must_use]
    pub fn for_graph(graph: &ResourceGraph) -> Self {
        Self {
            substrate: graph.plan_phase(Phase::Substrate),
            workload: graph.plan_phase(Phase::Workload),
            fingerprint: Self::fingerprint_of(graph),
        }
    }

    /// Digest of the declarations in dependency order, independent of how
    /// the phases are split
    #[must_use]
    pub fn fingerprint_of(graph: &ResourceGraph) -> String {
        graph.plan().fingerprint(graph)
    }

    /// Plan of one phase
    #[must_use]
    pub fn phase(&self, phase: Phase) -> &DeploymentPlan {
        match phase {
            Phase::Substrate => &self.substrate,
            Phase::Workload => &self.workload,
        }
    }
}

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployFailure {
    /// Phase of the failed nodes
    pub phase: Phase,
    /// Failed batch within the phase, when a batch failed
    pub batch: Option<usize>,
    /// Failed nodes
    pub failures: Vec<NodeFailure>,
}

impl fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase failed", self.phase)?;
        if let Some(batch) = self.batch {
            write!(f, " in batch {batch}")?;
        }
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

/// Final status of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStatus {
    /// Every node is live and every output is bound
    Succeeded,
    /// A collaborator failed
    Failed(DeployFailure),
    /// Cancellation stopped the run between batches
    Cancelled {
        /// Phase that was running
        phase: Phase,
        /// Batch that did not start
        next_batch: usize,
    },
}

impl DeployStatus {
    /// Whether the run succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Failure details, if the run failed
    #[must_use]
    pub fn failure(&self) -> Option<&DeployFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(failure) => write!(f, "failed: {failure}"),
            Self::Cancelled { phase, next_batch } => {
                write!(f, "cancelled in the {phase} phase before batch {next_batch}")
            }
        }
    }
}

/// Result of [`DeployCoordinator::apply`]
#[derive(Debug, Clone)]
pub struct DeployResult {
    /// Unique id of the run
    pub run_id: Uuid,
    /// Final status
    pub status: DeployStatus,
    /// Bound outputs; empty unless the run succeeded
    pub outputs: Vec<Output>,
    /// Every state transition, in order
    pub transitions: Vec<Transition>,
    /// Nodes made live by the run, in execution order
    pub realized: Vec<NodeId>,
    /// Fingerprint of the executed plan
    pub plan_fingerprint: String,
    /// Start of the run
    pub started_at: DateTime<Utc>,
    /// End of the run
    pub finished_at: DateTime<Utc>,
}

impl DeployResult {
    /// Whether the run succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// States visited, starting at `Init`
    #[must_use]
    pub fn states(&self) -> Vec<DeployState> {
        std::iter::once(DeployState::Init)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    /// Last state reached
    #[must_use]
    pub fn final_state(&self) -> DeployState {
        self.transitions.last().map_or(DeployState::Init, |t| t.to)
    }

    /// Output by name
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Every plain output value by name; sensitive outputs are absent
    #[must_use]
    pub fn plain_outputs(&self) -> BTreeMap<String, Json> {
        self.outputs
            .iter()
            .filter_map(|o| o.plain_value().map(|v| (o.name.clone(), v.clone())))
            .collect()
    }
}

/// Result of [`DeployCoordinator::destroy`]
#[derive(Debug, Clone)]
pub struct DestroyResult {
    /// Unique id of the run
    pub run_id: Uuid,
    /// Final status
    pub status: DeployStatus,
    /// Deleted nodes, in deletion order
    pub deleted: Vec<NodeId>,
}

/// Drives a deploy run through both phases
pub struct DeployCoordinator {
    provisioner: Arc<dyn Provisioner>,
    applier: Arc<dyn ClusterApplier>,
    secrets: Arc<dyn SecretStore>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl DeployCoordinator {
    /// Create a coordinator over the three collaborators
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        applier: Arc<dyn ClusterApplier>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            provisioner,
            applier,
            secrets,
            config: EngineConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// With engine configuration
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// With an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels runs of this coordinator between batches
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.max_concurrency, self.cancel.clone())
    }

    /// Build and plan without side effects
    ///
    /// # Errors
    /// `DeployError::Graph` if the declarations do not form a valid graph.
    pub fn plan(&self, declarations: Vec<ResourceDecl>) -> Result<PhasedPlan, DeployError> {
        let graph = build_graph(declarations)?;
        Ok(PhasedPlan::for_graph(&graph))
    }

    /// Apply declarations and bind outputs
    ///
    /// # Errors
    /// Returns `Err` for invalid configuration, graph errors, output specs
    /// naming undeclared nodes, unresolved outputs and broken internal
    /// invariants. Collaborator failures are reported in
    /// [`DeployResult::status`].
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn apply(
        &self,
        declarations: Vec<ResourceDecl>,
        output_specs: &[OutputSpec],
    ) -> Result<DeployResult, DeployError> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started_at = Utc::now();

        self.config.validate()?;
        let graph = build_graph(declarations)?;
        validate_specs(&graph, output_specs)?;

        let mut run = Run {
            tracker: StateTracker::new(),
            store: AttributeStore::new(),
            realized: Vec::new(),
        };

        run.tracker.advance(DeployState::SubstratePlanning)?;
        let substrate_plan = graph.plan_phase(Phase::Substrate);
        let fingerprint = PhasedPlan::fingerprint_of(&graph);
        info!(
            nodes = graph.node_count(),
            batches = substrate_plan.len(),
            fingerprint = %fingerprint,
            "planned substrate phase"
        );

        let finish = |run: Run, status: DeployStatus, outputs: Vec<Output>| {
            match &status {
                DeployStatus::Succeeded => info!(outputs = outputs.len(), "deploy succeeded"),
                other => warn!(status = %other, "deploy stopped"),
            }
            DeployResult {
                run_id,
                status,
                outputs,
                transitions: run.tracker.into_history(),
                realized: run.realized,
                plan_fingerprint: fingerprint.clone(),
                started_at,
                finished_at: Utc::now(),
            }
        };

        // Substrate
        run.tracker.advance(DeployState::SubstrateApplying)?;
        let substrate = SubstrateExecutor::new(Arc::clone(&self.provisioner));
        let outcome = self
            .scheduler()
            .apply(&graph, &substrate_plan, &substrate, &mut run.store)
            .await
            .map_err(invariant)?;
        if let Some(status) = run.absorb(outcome, Phase::Substrate)? {
            return Ok(finish(run, status, Vec::new()));
        }
        run.tracker.advance(DeployState::SubstrateComplete)?;

        let connections = match self.connections(&graph, &run.store)? {
            Ok(connections) => connections,
            Err(failure) => {
                run.tracker.advance(DeployState::Failed(Phase::Substrate))?;
                let status = DeployStatus::Failed(DeployFailure {
                    phase: Phase::Substrate,
                    batch: None,
                    failures: vec![failure],
                });
                return Ok(finish(run, status, Vec::new()));
            }
        };

        // Workload
        run.tracker.advance(DeployState::WorkloadPlanning)?;
        let workload_plan = graph.plan_phase(Phase::Workload);
        info!(batches = workload_plan.len(), "planned workload phase");

        run.tracker.advance(DeployState::WorkloadApplying)?;
        let workload = WorkloadExecutor::new(Arc::clone(&self.applier), connections);
        let outcome = self
            .scheduler()
            .apply(&graph, &workload_plan, &workload, &mut run.store)
            .await
            .map_err(invariant)?;
        if let Some(status) = run.absorb(outcome, Phase::Workload)? {
            return Ok(finish(run, status, Vec::new()));
        }

        // Outputs
        let binder = OutputBinder::new(self.secrets.as_ref(), &self.config.secret_prefix);
        match binder.collect(&graph, &run.store, output_specs).await {
            Ok(outputs) => {
                run.tracker.advance(DeployState::Done)?;
                Ok(finish(run, DeployStatus::Succeeded, outputs))
            }
            Err(OutputError::Unresolved { output, attribute }) => {
                error!(%output, %attribute, "output source not resolved");
                Err(DeployError::UnresolvedOutput { output, attribute })
            }
            Err(OutputError::Store { failure, .. }) => {
                run.tracker.advance(DeployState::Failed(Phase::Workload))?;
                let status = DeployStatus::Failed(DeployFailure {
                    phase: failure.phase,
                    batch: None,
                    failures: vec![failure],
                });
                Ok(finish(run, status, Vec::new()))
            }
        }
    }

    /// Delete every substrate node in reverse dependency order
    ///
    /// # Errors
    /// `DeployError::Graph` if the declarations do not form a valid graph.
    #[instrument(skip_all)]
    pub async fn destroy(
        &self,
        declarations: Vec<ResourceDecl>,
    ) -> Result<DestroyResult, DeployError> {
        let run_id = Uuid::new_v4();
        self.config.validate()?;
        let graph = build_graph(declarations)?;
        let plan = graph.plan_phase(Phase::Substrate).reversed();
        info!(%run_id, batches = plan.len(), "destroying substrate");

        let outcome = self
            .scheduler()
            .destroy(&graph, &plan, self.provisioner.as_ref())
            .await
            .map_err(invariant)?;

        let deleted = outcome.completed().to_vec();
        let status = match outcome {
            PhaseOutcome::Completed { .. } => DeployStatus::Succeeded,
            PhaseOutcome::Failed { batch, failures, .. } => DeployStatus::Failed(DeployFailure {
                phase: Phase::Substrate,
                batch: Some(batch),
                failures,
            }),
            PhaseOutcome::Cancelled { next_batch, .. } => DeployStatus::Cancelled {
                phase: Phase::Substrate,
                next_batch,
            },
        };
        info!(%run_id, deleted = deleted.len(), status = %status, "destroy finished");
        Ok(DestroyResult {
            run_id,
            status,
            deleted,
        })
    }

    /// Connections of every cluster targeted by a workload node.
    ///
    /// The outer `Result` carries invariant violations, the inner one an
    /// unreachable cluster.
    fn connections(
        &self,
        graph: &ResourceGraph,
        store: &AttributeStore,
    ) -> Result<Result<Vec<ClusterConnection>, NodeFailure>, DeployError> {
        if let Some(missing) = graph
            .nodes_in_phase(Phase::Substrate)
            .find(|node| !store.is_live(node.id()))
        {
            error!(node = %missing.id(), "substrate phase completed with a node not live");
            return Err(ResolveError::NotLive(missing.id().clone()).into());
        }

        let mut clusters: Vec<&NodeId> = Vec::new();
        for node in graph.nodes_in_phase(Phase::Workload) {
            if let Some(cluster) = node.cluster() {
                if !clusters.contains(&cluster) {
                    clusters.push(cluster);
                }
            }
        }

        let mut connections = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            match connect(cluster, store, &self.config.cluster_connection) {
                Ok(connection) => {
                    info!(%cluster, endpoint = %connection.endpoint, "cluster reachable");
                    connections.push(connection);
                }
                Err(cause) => {
                    let resource_type = graph.node(cluster).map_or_else(
                        || ResourceType::from("unknown"),
                        |n| n.resource_type().clone(),
                    );
                    return Ok(Err(NodeFailure {
                        node: cluster.clone(),
                        resource_type,
                        phase: Phase::Substrate,
                        cause,
                    }));
                }
            }
        }
        Ok(Ok(connections))
    }
}

struct Run {
    tracker: StateTracker,
    store: AttributeStore,
    realized: Vec<NodeId>,
}

impl Run {
    /// Record a phase outcome; returns the final status if the run must stop
    fn absorb(
        &mut self,
        outcome: PhaseOutcome,
        phase: Phase,
    ) -> Result<Option<DeployStatus>, DeployError> {
        self.realized.extend_from_slice(outcome.completed());
        let status = match outcome {
            PhaseOutcome::Completed { .. } => return Ok(None),
            PhaseOutcome::Failed { batch, failures, .. } => DeployStatus::Failed(DeployFailure {
                phase,
                batch: Some(batch),
                failures,
            }),
            PhaseOutcome::Cancelled { next_batch, .. } => {
                DeployStatus::Cancelled { phase, next_batch }
            }
        };
        self.tracker.advance(DeployState::Failed(phase))?;
        Ok(Some(status))
    }
}

fn build_graph(declarations: Vec<ResourceDecl>) -> Result<ResourceGraph, DeployError> {
    let mut builder = GraphBuilder::new();
    builder.extend(declarations);
    builder.build().map_err(|err| {
        error!(error = %err, "declarations rejected");
        DeployError::Graph(err)
    })
}

fn invariant(err: ResolveError) -> DeployError {
    error!(error = %err, "invariant violated");
    DeployError::Invariant(err)
}
