//! Node executors: how one resolved node becomes live.
//!
//! The scheduler is phase-agnostic. It hands each node and its concrete
//! properties to a [`NodeExecutor`]; substrate nodes go to a provisioner,
//! workload nodes to a cluster applier bound to a realized cluster.

use crate::capability::{
    ClusterApplier, ClusterConnection, ClusterCredentials, ClusterEndpoint, ConcreteProperties,
    LiveAttributes, ManifestDocument, ProvisionRequest, Provisioner, SecretValue,
};
use crate::config::ConnectionAttributes;
use crate::error::FailureCause;
use crate::resolver::AttributeStore;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use strata_graph::{NodeId, ResourceNode};

/// Property holding the document of a workload node
pub const MANIFEST_PROPERTY: &str = "manifest";

/// Realizes one node
#[async_trait::async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Make the node live and report its attributes
    async fn realize(
        &self,
        node: &ResourceNode,
        properties: ConcreteProperties,
    ) -> Result<LiveAttributes, FailureCause>;
}

/// Substrate executor backed by the provider API
pub struct SubstrateExecutor {
    provisioner: Arc<dyn Provisioner>,
}

impl SubstrateExecutor {
    /// Wrap a provisioner
    #[must_use]
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }
}

#[async_trait::async_trait]
impl NodeExecutor for SubstrateExecutor {
    async fn realize(
        &self,
        node: &ResourceNode,
        properties: ConcreteProperties,
    ) -> Result<LiveAttributes, FailureCause> {
        let request = ProvisionRequest {
            node: node.id().clone(),
            resource_type: node.resource_type().clone(),
            properties,
        };
        Ok(self.provisioner.create_or_update(&request).await?)
    }
}

/// Workload executor backed by the in-cluster apply API
pub struct WorkloadExecutor {
    applier: Arc<dyn ClusterApplier>,
    connections: HashMap<NodeId, ClusterConnection>,
}

impl WorkloadExecutor {
    /// Bind an applier to the connections of realized clusters
    #[must_use]
    pub fn new(applier: Arc<dyn ClusterApplier>, connections: Vec<ClusterConnection>) -> Self {
        Self {
            applier,
            connections: connections.into_iter().map(|c| (c.cluster.clone(), c)).collect(),
        }
    }
}

#[async_trait::async_trait]
impl NodeExecutor for WorkloadExecutor {
    async fn realize(
        &self,
        node: &ResourceNode,
        properties: ConcreteProperties,
    ) -> Result<LiveAttributes, FailureCause> {
        let cluster = node.cluster().unwrap_or_else(|| node.id());
        let connection = self
            .connections
            .get(cluster)
            .ok_or_else(|| FailureCause::ClusterUnreachable {
                cluster: cluster.clone(),
                attribute: "endpoint".to_string(),
            })?;

        let manifest = manifest_document(node, properties);
        self.applier
            .apply_manifest(&connection.endpoint, &connection.credentials, &manifest)
            .await?;

        let mut attributes = LiveAttributes::new();
        attributes.insert("cluster".to_string(), Json::String(cluster.to_string()));
        Ok(attributes)
    }
}

/// Document to apply for a workload node: its `manifest` property when
/// declared, otherwise the whole property map
#[must_use]
pub fn manifest_document(
    node: &ResourceNode,
    mut properties: ConcreteProperties,
) -> ManifestDocument {
    let body = match properties.remove(MANIFEST_PROPERTY) {
        Some(manifest) => manifest,
        None => Json::Object(properties.into_iter().collect()),
    };
    ManifestDocument {
        node: node.id().clone(),
        kind: node.resource_type().clone(),
        body,
    }
}

/// Read a realized cluster's connection from the attribute store
///
/// # Errors
/// `FailureCause::ClusterUnreachable` naming the first missing attribute.
pub fn connect(
    cluster: &NodeId,
    store: &AttributeStore,
    names: &ConnectionAttributes,
) -> Result<ClusterConnection, FailureCause> {
    let text = |attribute: &str| -> Result<String, FailureCause> {
        match store.attribute(cluster, attribute) {
            Some(Json::String(s)) if !s.is_empty() => Ok(s.clone()),
            _ => Err(FailureCause::ClusterUnreachable {
                cluster: cluster.clone(),
                attribute: attribute.to_string(),
            }),
        }
    };

    let endpoint = text(&names.endpoint)?;
    let certificate_authority = text(&names.certificate_authority)?;
    let token = store
        .attribute(cluster, &names.token)
        .filter(|value| !value.is_null())
        .map(SecretValue::from_json);

    Ok(ClusterConnection {
        cluster: cluster.clone(),
        endpoint: ClusterEndpoint::new(endpoint),
        credentials: ClusterCredentials {
            certificate_authority,
            token,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_graph::{GraphBuilder, ResourceDecl, ResourceGraph};

    fn graph() -> ResourceGraph {
        let mut builder = GraphBuilder::new();
        builder.add_node(ResourceDecl::new("cluster", "eks.cluster"));
        builder.add_node(ResourceDecl::workload("ingress", "k8s.helm_chart", "cluster"));
        builder.build().unwrap()
    }

    fn live(pairs: &[(&str, Json)]) -> LiveAttributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn manifest_property_is_the_document() {
        let graph = graph();
        let node = graph.node(&NodeId::new("ingress")).unwrap();
        let mut props = ConcreteProperties::new();
        props.insert("manifest".into(), json!({"kind": "Deployment"}));
        props.insert("namespace".into(), json!("kube-system"));

        let doc = manifest_document(node, props);
        assert_eq!(doc.body, json!({"kind": "Deployment"}));
        assert_eq!(doc.kind.as_str(), "k8s.helm_chart");
    }

    #[test]
    fn whole_property_map_without_manifest() {
        let graph = graph();
        let node = graph.node(&NodeId::new("ingress")).unwrap();
        let mut props = ConcreteProperties::new();
        props.insert("chart".into(), json!("ingress-nginx"));

        assert_eq!(manifest_document(node, props).body, json!({"chart": "ingress-nginx"}));
    }

    #[test]
    fn connect_reads_endpoint_and_ca() {
        let mut store = AttributeStore::new();
        store
            .record(
                NodeId::new("cluster"),
                live(&[
                    ("endpoint", json!("https://eks.example")),
                    ("certificate_authority", json!("LS0tCg==")),
                ]),
            )
            .unwrap();

        let conn =
            connect(&NodeId::new("cluster"), &store, &ConnectionAttributes::default()).unwrap();
        assert_eq!(conn.endpoint.as_str(), "https://eks.example");
        assert_eq!(conn.credentials.certificate_authority, "LS0tCg==");
        assert!(conn.credentials.token.is_none());
    }

    #[test]
    fn connect_names_missing_attribute() {
        let mut store = AttributeStore::new();
        store
            .record(NodeId::new("cluster"), live(&[("endpoint", json!("https://eks.example"))]))
            .unwrap();

        assert_eq!(
            connect(&NodeId::new("cluster"), &store, &ConnectionAttributes::default()),
            Err(FailureCause::ClusterUnreachable {
                cluster: NodeId::new("cluster"),
                attribute: "certificate_authority".into(),
            })
        );
    }
}
