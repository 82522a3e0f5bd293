//! In-memory collaborators for dry runs and tests.
//!
//! [`InMemoryProvisioner`] keeps existing resources keyed by node id, so a
//! second apply of unchanged declarations performs no create at all.

use crate::capability::{
    ApplyError, ClusterApplier, ClusterCredentials, ClusterEndpoint, ConcreteProperties,
    LiveAttributes, ManifestDocument, ProviderError, ProvisionRequest, Provisioner, SecretStore,
    SecretValue, StoreError,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_graph::{NodeId, ResourceType};
use tracing::debug;

/// Extra attributes a simulated resource type reports once live
pub type AttributeFn = Arc<dyn Fn(&NodeId, &ConcreteProperties) -> LiveAttributes + Send + Sync>;

#[derive(Debug, Clone)]
struct SimulatedResource {
    resource_type: ResourceType,
    serial: usize,
    properties: ConcreteProperties,
    attributes: LiveAttributes,
}

/// Call counters of an [`InMemoryProvisioner`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionStats {
    /// Resources created
    pub creates: usize,
    /// Resources updated in place
    pub updates: usize,
    /// Calls that found the resource unchanged
    pub unchanged: usize,
    /// Resources deleted
    pub deletes: usize,
}

/// Idempotent provisioner keeping resources in memory
pub struct InMemoryProvisioner {
    account: String,
    resources: DashMap<NodeId, SimulatedResource>,
    attribute_fns: HashMap<ResourceType, AttributeFn>,
    serial: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    unchanged: AtomicUsize,
    deletes: AtomicUsize,
}

impl Default for InMemoryProvisioner {
    fn default() -> Self {
        Self::new("000000000000")
    }
}

impl InMemoryProvisioner {
    /// Create an empty provisioner for a simulated account
    #[must_use]
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            resources: DashMap::new(),
            attribute_fns: HashMap::new(),
            serial: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            unchanged: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Report extra attributes for every resource of `resource_type`
    #[must_use]
    pub fn with_attributes<F>(
        mut self,
        resource_type: impl Into<ResourceType>,
        attributes: F,
    ) -> Self
    where
        F: Fn(&NodeId, &ConcreteProperties) -> LiveAttributes + Send + Sync + 'static,
    {
        self.attribute_fns.insert(resource_type.into(), Arc::new(attributes));
        self
    }

    /// Call counters so far
    #[must_use]
    pub fn stats(&self) -> ProvisionStats {
        ProvisionStats {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            unchanged: self.unchanged.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Whether a resource exists for the node
    #[must_use]
    pub fn exists(&self, node: &NodeId) -> bool {
        self.resources.contains_key(node)
    }

    /// Number of existing resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether no resource exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Current properties of an existing resource
    #[must_use]
    pub fn properties(&self, node: &NodeId) -> Option<ConcreteProperties> {
        self.resources.get(node).map(|r| r.properties.clone())
    }

    fn attributes_for(&self, request: &ProvisionRequest, serial: usize) -> LiveAttributes {
        let kind = request.resource_type.as_str();
        let service = kind.split('.').next().unwrap_or(kind);
        let mut attributes = request.properties.clone();
        attributes
            .entry("name".to_string())
            .or_insert_with(|| Json::String(request.node.to_string()));
        attributes.insert(
            "id".to_string(),
            Json::String(format!("{service}-{serial:08x}")),
        );
        attributes.insert(
            "arn".to_string(),
            Json::String(format!(
                "arn:sim:{service}::{}:{}/{}",
                self.account, kind, request.node
            )),
        );
        if let Some(extra) = self.attribute_fns.get(&request.resource_type) {
            attributes.extend(extra(&request.node, &request.properties));
        }
        attributes
    }
}

#[async_trait]
impl Provisioner for InMemoryProvisioner {
    async fn create_or_update(
        &self,
        request: &ProvisionRequest,
    ) -> Result<LiveAttributes, ProviderError> {
        // The entry guard holds the shard lock until the resource is settled
        match self.resources.entry(request.node.clone()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.resource_type != request.resource_type {
                    return Err(ProviderError::new(format!(
                        "`{}` exists as {}, cannot become {}",
                        request.node, existing.resource_type, request.resource_type
                    )));
                }
                if existing.properties == request.properties {
                    self.unchanged.fetch_add(1, Ordering::SeqCst);
                    debug!(node = %request.node, "unchanged");
                } else {
                    existing.attributes = self.attributes_for(request, existing.serial);
                    existing.properties = request.properties.clone();
                    self.updates.fetch_add(1, Ordering::SeqCst);
                    debug!(node = %request.node, "updated in place");
                }
                Ok(existing.attributes.clone())
            }
            Entry::Vacant(slot) => {
                let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
                let attributes = self.attributes_for(request, serial);
                slot.insert(SimulatedResource {
                    resource_type: request.resource_type.clone(),
                    serial,
                    properties: request.properties.clone(),
                    attributes: attributes.clone(),
                });
                self.creates.fetch_add(1, Ordering::SeqCst);
                debug!(node = %request.node, kind = %request.resource_type, "created");
                Ok(attributes)
            }
        }
    }

    async fn delete(
        &self,
        node: &NodeId,
        _resource_type: &ResourceType,
    ) -> Result<(), ProviderError> {
        if self.resources.remove(node).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            debug!(%node, "deleted");
        }
        Ok(())
    }
}

/// One recorded apply call
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedManifest {
    /// Endpoint the document was applied to
    pub endpoint: ClusterEndpoint,
    /// Credentials used
    pub credentials: ClusterCredentials,
    /// Applied document
    pub manifest: ManifestDocument,
}

/// Cluster applier that records every document
#[derive(Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<AppliedManifest>>,
}

impl RecordingApplier {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every apply call so far, in call order
    #[must_use]
    pub fn applied(&self) -> Vec<AppliedManifest> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl ClusterApplier for RecordingApplier {
    async fn apply_manifest(
        &self,
        endpoint: &ClusterEndpoint,
        credentials: &ClusterCredentials,
        manifest: &ManifestDocument,
    ) -> Result<(), ApplyError> {
        if manifest.body.is_null() {
            return Err(ApplyError::new(format!("`{}` has an empty document", manifest.node)));
        }
        debug!(node = %manifest.node, %endpoint, "manifest applied");
        self.applied.lock().push(AppliedManifest {
            endpoint: endpoint.clone(),
            credentials: credentials.clone(),
            manifest: manifest.clone(),
        });
        Ok(())
    }
}

/// Secret store keeping values in memory
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<BTreeMap<String, SecretValue>>,
}

impl InMemorySecretStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SecretValue> {
        self.secrets.lock().get(name).cloned()
    }

    /// Stored names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.secrets.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn store(&self, name: &str, value: &SecretValue) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::new("secret name must not be empty"));
        }
        self.secrets.lock().insert(name.to_string(), value.clone());
        debug!(name, "secret stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(node: &str, kind: &str, props: &[(&str, Json)]) -> ProvisionRequest {
        ProvisionRequest {
            node: NodeId::new(node),
            resource_type: ResourceType::new(kind),
            properties: props.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
        }
    }

    #[tokio::test]
    async fn create_then_unchanged_then_update() {
        let sim = InMemoryProvisioner::default();
        let first = sim
            .create_or_update(&request("repo", "ecr.repository", &[("name", json!("runner"))]))
            .await
            .unwrap();
        let second = sim
            .create_or_update(&request("repo", "ecr.repository", &[("name", json!("runner"))]))
            .await
            .unwrap();
        assert_eq!(first, second);

        let third = sim
            .create_or_update(&request("repo", "ecr.repository", &[("name", json!("renamed"))]))
            .await
            .unwrap();
        assert_eq!(third["id"], first["id"]);
        assert_eq!(third["name"], json!("renamed"));
        assert_eq!(
            sim.stats(),
            ProvisionStats {
                creates: 1,
                updates: 1,
                unchanged: 1,
                deletes: 0
            }
        );
    }

    #[tokio::test]
    async fn per_type_attributes() {
        let sim = InMemoryProvisioner::default().with_attributes("eks.cluster", |node, _| {
            [("endpoint".to_string(), json!(format!("https://{node}.eks.sim")))]
                .into_iter()
                .collect()
        });
        let attrs = sim.create_or_update(&request("c", "eks.cluster", &[])).await.unwrap();
        assert_eq!(attrs["endpoint"], json!("https://c.eks.sim"));
        assert_eq!(attrs["name"], json!("c"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let sim = InMemoryProvisioner::default();
        sim.create_or_update(&request("vpc", "ec2.vpc", &[])).await.unwrap();
        sim.delete(&NodeId::new("vpc"), &ResourceType::new("ec2.vpc")).await.unwrap();
        sim.delete(&NodeId::new("vpc"), &ResourceType::new("ec2.vpc")).await.unwrap();
        assert_eq!(sim.stats().deletes, 1);
        assert!(sim.is_empty());
    }

    #[tokio::test]
    async fn type_change_is_refused() {
        let sim = InMemoryProvisioner::default();
        sim.create_or_update(&request("x", "iam.role", &[])).await.unwrap();
        assert!(sim.create_or_update(&request("x", "iam.user", &[])).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_for_one_node_create_it_once() {
        let sim = Arc::new(InMemoryProvisioner::default());
        let calls: Vec<_> = (0..16)
            .map(|_| {
                let sim = Arc::clone(&sim);
                tokio::spawn(async move {
                    sim.create_or_update(&request("repo", "ecr.repository", &[]))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for call in calls {
            ids.push(call.await.unwrap()["id"].clone());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(sim.stats().creates, 1);
        assert_eq!(sim.stats().unchanged, 15);
    }

    #[tokio::test]
    async fn secret_store_keeps_values() {
        let store = InMemorySecretStore::new();
        store.store("a", &SecretValue::new("1")).await.unwrap();
        assert_eq!(store.get("a").unwrap().expose(), "1");
        assert!(store.store("", &SecretValue::new("x")).await.is_err());
        assert_eq!(store.names(), vec!["a".to_string()]);
    }
}
