//! Testing utilities for the Strata workspace
//!
//! Journaling and failure-injecting collaborators, plus small declaration
//! fixtures shared by integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use strata_engine::simulator::{InMemoryProvisioner, InMemorySecretStore, RecordingApplier};
use strata_engine::{
    ApplyError, ClusterApplier, ClusterCredentials, ClusterEndpoint, ConcreteProperties,
    DeployCoordinator, EngineConfig, LiveAttributes, ManifestDocument, ProviderError,
    ProvisionRequest, Provisioner, SecretStore, SecretValue, StoreError,
};
use strata_graph::{NodeId, ResourceDecl, ResourceType, Template, Value};

/// Collaborator call, as seen by the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Provisioned(NodeId),
    Applied(NodeId),
    Stored(String),
    Deleted(NodeId),
}

/// Shared, ordered record of collaborator calls
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    /// Position of the first event matching `event`
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }

    pub fn provisioned(&self) -> Vec<NodeId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Provisioned(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn applied(&self) -> Vec<NodeId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Applied(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

/// Endpoint and CA data the simulated cluster reports
pub fn cluster_attributes(node: &NodeId, _props: &ConcreteProperties) -> LiveAttributes {
    [
        ("endpoint".to_string(), json!(format!("https://{node}.eks.sim"))),
        ("certificate_authority".to_string(), json!("LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t")),
    ]
    .into_iter()
    .collect()
}

/// Simulated provisioner whose `eks.cluster` resources report a connection
pub fn simulated_provisioner() -> InMemoryProvisioner {
    InMemoryProvisioner::default()
        .with_attributes("eks.cluster", cluster_attributes)
        .with_attributes("iam.access_key", |node, _| {
            [("secret_access_key".to_string(), json!(format!("sim-secret-for-{node}")))]
                .into_iter()
                .collect()
        })
}

/// Provisioner wrapper that journals calls and fails chosen nodes
pub struct FaultyProvisioner {
    inner: InMemoryProvisioner,
    journal: Journal,
    fail: Mutex<HashSet<NodeId>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<NodeId>>,
}

impl FaultyProvisioner {
    pub fn new(inner: InMemoryProvisioner, journal: Journal) -> Self {
        Self {
            inner,
            journal,
            fail: Mutex::new(HashSet::new()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail every create-or-update of `node`
    pub fn fail_on(self, node: impl Into<NodeId>) -> Self {
        self.fail.lock().insert(node.into());
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stop failing every node
    pub fn heal(&self) {
        self.fail.lock().clear();
    }

    pub fn inner(&self) -> &InMemoryProvisioner {
        &self.inner
    }

    /// Every create-or-update call, including failed ones
    pub fn calls(&self) -> Vec<NodeId> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Provisioner for FaultyProvisioner {
    async fn create_or_update(
        &self,
        request: &ProvisionRequest,
    ) -> Result<LiveAttributes, ProviderError> {
        self.calls.lock().push(request.node.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.lock().contains(&request.node) {
            return Err(ProviderError::new(format!("injected failure for {}", request.node)));
        }
        let attributes = self.inner.create_or_update(request).await?;
        self.journal.push(Event::Provisioned(request.node.clone()));
        Ok(attributes)
    }

    async fn delete(
        &self,
        node: &NodeId,
        resource_type: &ResourceType,
    ) -> Result<(), ProviderError> {
        self.inner.delete(node, resource_type).await?;
        self.journal.push(Event::Deleted(node.clone()));
        Ok(())
    }
}

/// Applier wrapper that journals calls and fails chosen nodes
pub struct JournalingApplier {
    inner: RecordingApplier,
    journal: Journal,
    fail: HashSet<NodeId>,
}

impl JournalingApplier {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: RecordingApplier::new(),
            journal,
            fail: HashSet::new(),
        }
    }

    pub fn fail_on(mut self, node: impl Into<NodeId>) -> Self {
        self.fail.insert(node.into());
        self
    }

    pub fn inner(&self) -> &RecordingApplier {
        &self.inner
    }
}

#[async_trait]
impl ClusterApplier for JournalingApplier {
    async fn apply_manifest(
        &self,
        endpoint: &ClusterEndpoint,
        credentials: &ClusterCredentials,
        manifest: &ManifestDocument,
    ) -> Result<(), ApplyError> {
        if self.fail.contains(&manifest.node) {
            return Err(ApplyError::new(format!("injected failure for {}", manifest.node)));
        }
        self.inner.apply_manifest(endpoint, credentials, manifest).await?;
        self.journal.push(Event::Applied(manifest.node.clone()));
        Ok(())
    }
}

/// Secret store wrapper that journals names and can refuse every write
pub struct JournalingSecretStore {
    inner: InMemorySecretStore,
    journal: Journal,
    refuse: bool,
}

impl JournalingSecretStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: InMemorySecretStore::new(),
            journal,
            refuse: false,
        }
    }

    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn inner(&self) -> &InMemorySecretStore {
        &self.inner
    }
}

#[async_trait]
impl SecretStore for JournalingSecretStore {
    async fn store(&self, name: &str, value: &SecretValue) -> Result<(), StoreError> {
        if self.refuse {
            return Err(StoreError::new("secret store unavailable"));
        }
        self.inner.store(name, value).await?;
        self.journal.push(Event::Stored(name.to_string()));
        Ok(())
    }
}

/// Collaborators plus the journal they share
pub struct Harness {
    pub journal: Journal,
    pub provisioner: Arc<FaultyProvisioner>,
    pub applier: Arc<JournalingApplier>,
    pub secrets: Arc<JournalingSecretStore>,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Journal::new();
        Self::with(
            FaultyProvisioner::new(simulated_provisioner(), journal.clone()),
            JournalingApplier::new(journal.clone()),
            JournalingSecretStore::new(journal.clone()),
            journal,
        )
    }

    pub fn with(
        provisioner: FaultyProvisioner,
        applier: JournalingApplier,
        secrets: JournalingSecretStore,
        journal: Journal,
    ) -> Self {
        Self {
            journal,
            provisioner: Arc::new(provisioner),
            applier: Arc::new(applier),
            secrets: Arc::new(secrets),
        }
    }

    pub fn coordinator(&self) -> DeployCoordinator {
        DeployCoordinator::new(self.provisioner.clone(), self.applier.clone(), self.secrets.clone())
    }

    pub fn coordinator_with(&self, config: EngineConfig) -> DeployCoordinator {
        self.coordinator().with_config(config)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// `R` (role) and `P` (policy attached to `R`)
pub fn role_and_policy() -> Vec<ResourceDecl> {
    vec![
        ResourceDecl::new("R", "iam.role").property("assumed_by", "ec2.amazonaws.com"),
        ResourceDecl::new("P", "iam.policy")
            .property("actions", Value::list(["autoscaling:DescribeAutoScalingGroups"]))
            .property("role", Value::reference("R", "name"))
            .attach_to("R"),
    ]
}

/// Cluster `C` and manifest `M` applied to it, templated with C's name
pub fn cluster_and_manifest() -> Vec<ResourceDecl> {
    vec![
        ResourceDecl::new("C", "eks.cluster").property("version", "1.21"),
        ResourceDecl::workload("M", "k8s.manifest", "C").property(
            "manifest",
            Template::new(json!({
                "kind": "Deployment",
                "args": ["--cluster=__CLUSTER_NAME__"]
            }))
            .bind("CLUSTER_NAME", Value::reference("C", "name")),
        ),
    ]
}

/// Three substrate batches: `a` | `b1`, `b2` (siblings) | `c`
pub fn three_batches() -> Vec<ResourceDecl> {
    vec![
        ResourceDecl::new("a", "ec2.vpc"),
        ResourceDecl::new("b1", "iam.role").property("vpc", Value::reference("a", "id")),
        ResourceDecl::new("b2", "ecr.repository").property("vpc", Value::reference("a", "id")),
        ResourceDecl::new("c", "eks.cluster")
            .property("role", Value::reference("b1", "arn"))
            .property("repo", Value::reference("b2", "arn")),
    ]
}
