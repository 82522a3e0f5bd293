//! Plan preview and dry runs of the stack against in-memory collaborators.

use crate::config::StackConfig;
use crate::error::StackError;
use crate::stack::declare_stack;
use serde_json::json;
use std::sync::Arc;
use strata_engine::simulator::{InMemoryProvisioner, InMemorySecretStore, RecordingApplier};
use strata_engine::{DeployCoordinator, DeployResult, DestroyResult, LiveAttributes, PhasedPlan};
use strata_graph::NodeId;
use tracing::info;
use uuid::Uuid;

/// Provisioner reporting the attributes the stack reads from its resources
#[must_use]
pub fn stack_provisioner() -> InMemoryProvisioner {
    InMemoryProvisioner::default()
        .with_attributes("eks.cluster", |node, _| cluster_connection(node))
        .with_attributes("iam.access_key", |_, _| {
            [(
                "secret_access_key".to_string(),
                json!(Uuid::new_v4().simple().to_string()),
            )]
            .into_iter()
            .collect()
        })
}

fn cluster_connection(node: &NodeId) -> LiveAttributes {
    [
        ("endpoint".to_string(), json!(format!("https://{node}.eks.sim"))),
        ("certificate_authority".to_string(), json!("c2ltdWxhdGVkLWNh")),
    ]
    .into_iter()
    .collect()
}

/// Outcome of a simulated apply
#[derive(Debug)]
pub struct Simulation {
    /// Engine result
    pub result: DeployResult,
    /// Secret names written; values stay in the store
    pub stored_secrets: Vec<String>,
    /// Documents applied inside the cluster
    pub applied_manifests: usize,
    /// Result of the teardown, when requested
    pub teardown: Option<DestroyResult>,
}

/// Simulated collaborators, shared between runs
pub struct Simulator {
    provisioner: Arc<InMemoryProvisioner>,
    applier: Arc<RecordingApplier>,
    secrets: Arc<InMemorySecretStore>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Fresh simulated account
    #[must_use]
    pub fn new() -> Self {
        Self {
            provisioner: Arc::new(stack_provisioner()),
            applier: Arc::new(RecordingApplier::new()),
            secrets: Arc::new(InMemorySecretStore::new()),
        }
    }

    /// Coordinator wired to the simulated collaborators
    #[must_use]
    pub fn coordinator(&self, config: &StackConfig) -> DeployCoordinator {
        DeployCoordinator::new(
            self.provisioner.clone(),
            self.applier.clone(),
            self.secrets.clone(),
        )
        .with_config(config.engine.clone())
    }

    /// The simulated provisioner
    #[must_use]
    pub fn provisioner(&self) -> &InMemoryProvisioner {
        &self.provisioner
    }

    /// The simulated cluster applier
    #[must_use]
    pub fn applier(&self) -> &RecordingApplier {
        &self.applier
    }

    /// The simulated secret store
    #[must_use]
    pub fn secrets(&self) -> &InMemorySecretStore {
        &self.secrets
    }

    /// Apply the stack, then tear it down when `teardown` is set and the
    /// apply succeeded
    ///
    /// # Errors
    /// `StackError::Deploy` when the stack is rejected before anything runs.
    pub async fn run(
        &self,
        config: &StackConfig,
        teardown: bool,
    ) -> Result<Simulation, StackError> {
        let stack = declare_stack(config)?;
        let coordinator = self.coordinator(config);
        let result = coordinator
            .apply(stack.declarations.clone(), &stack.outputs)
            .await?;
        info!(status = %result.status, realized = result.realized.len(), "simulation finished");

        let teardown = if teardown && result.is_success() {
            Some(coordinator.destroy(stack.declarations).await?)
        } else {
            None
        };

        Ok(Simulation {
            result,
            stored_secrets: self.secrets.names(),
            applied_manifests: self.applier.applied().len(),
            teardown,
        })
    }
}

/// Phased plan of the stack without running anything
///
/// # Errors
/// `StackError::Deploy` when the declarations do not form a valid graph.
pub fn plan(config: &StackConfig) -> Result<PhasedPlan, StackError> {
    let stack = declare_stack(config)?;
    let coordinator = Simulator::new().coordinator(config);
    Ok(coordinator.plan(stack.declarations)?)
}

/// Apply the stack against a fresh simulated account
///
/// # Errors
/// As [`Simulator::run`].
pub async fn simulate(config: &StackConfig, teardown: bool) -> Result<Simulation, StackError> {
    Simulator::new().run(config, teardown).await
}
