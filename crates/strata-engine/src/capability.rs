//! External collaborator capabilities.
//!
//! The engine never talks to a cloud or a cluster directly. It drives three
//! capabilities supplied by the caller:
//! - [`Provisioner`]: creates, updates and deletes provider resources
//! - [`ClusterApplier`]: applies documents against a live cluster endpoint
//! - [`SecretStore`]: keeps sensitive outputs out of plaintext channels
//!
//! Implementations must be idempotent per resource identity: re-provisioning
//! a node that already exists is a no-op or an in-place update, never a
//! duplicate create.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use strata_graph::{NodeId, ResourceType};

/// Properties with every reference substituted
pub type ConcreteProperties = BTreeMap<String, Json>;

/// Attributes reported by a collaborator once a node is live
pub type LiveAttributes = BTreeMap<String, Json>;

/// One create-or-update call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionRequest {
    /// Resource identity; the provisioner keys existence on this
    pub node: NodeId,
    /// Provider resource type
    pub resource_type: ResourceType,
    /// Concrete properties
    pub properties: ConcreteProperties,
}

/// Provider resource API
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the resource, or update it in place if it already exists
    async fn create_or_update(
        &self,
        request: &ProvisionRequest,
    ) -> Result<LiveAttributes, ProviderError>;

    /// Delete the resource; deleting a missing resource succeeds
    async fn delete(
        &self,
        node: &NodeId,
        resource_type: &ResourceType,
    ) -> Result<(), ProviderError>;
}

/// In-cluster apply API
#[async_trait]
pub trait ClusterApplier: Send + Sync {
    /// Apply a document against a live cluster
    async fn apply_manifest(
        &self,
        endpoint: &ClusterEndpoint,
        credentials: &ClusterCredentials,
        manifest: &ManifestDocument,
    ) -> Result<(), ApplyError>;
}

/// Secret store for sensitive outputs
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store `value` under `name`, replacing any previous value
    async fn store(&self, name: &str, value: &SecretValue) -> Result<(), StoreError>;
}

/// Live API endpoint of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClusterEndpoint(String);

impl ClusterEndpoint {
    /// Wrap an endpoint URL
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Endpoint URL
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credentials needed to talk to a cluster endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCredentials {
    /// Certificate authority data for the endpoint
    pub certificate_authority: String,
    /// Bearer token, when the cluster issues one
    pub token: Option<SecretValue>,
}

/// Endpoint plus credentials of one realized cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConnection {
    /// Cluster node the connection belongs to
    pub cluster: NodeId,
    /// API endpoint
    pub endpoint: ClusterEndpoint,
    /// Auth material
    pub credentials: ClusterCredentials,
}

/// Document applied inside a cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestDocument {
    /// Workload node the document belongs to
    pub node: NodeId,
    /// Resource type of the workload node (`k8s.manifest`, `k8s.helm_chart`, ...)
    pub kind: ResourceType,
    /// Rendered document body
    pub body: Json,
}

/// Value that must never reach a plaintext channel.
///
/// `Debug` and `Display` print a fixed mask; read the value with
/// [`SecretValue::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wrap a secret
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Wrap a resolved attribute; non-string JSON is kept in its compact text form
    #[must_use]
    pub fn from_json(value: &Json) -> Self {
        match value {
            Json::String(s) => Self(s.clone()),
            other => Self(other.to_string()),
        }
    }

    /// Read the secret
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(crate::redact::REDACTED)
    }
}

/// Error from the provider resource API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("provider error: {message}")]
pub struct ProviderError {
    /// Provider message
    pub message: String,
    /// Whether re-running apply may succeed
    pub retryable: bool,
}

impl ProviderError {
    /// Non-retryable provider error
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Retryable provider error (throttling, transient outage)
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Error from the in-cluster apply API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cluster apply error: {message}")]
pub struct ApplyError {
    /// Cluster API message
    pub message: String,
    /// Whether re-running apply may succeed
    pub retryable: bool,
}

impl ApplyError {
    /// Non-retryable apply error
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Retryable apply error
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Error from the secret store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("secret store error: {message}")]
pub struct StoreError {
    /// Store message
    pub message: String,
}

impl StoreError {
    /// Create a store error
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_value_never_prints_content() {
        let secret = SecretValue::new("wJalrXUtnFEMI");
        assert_eq!(format!("{secret:?}"), "SecretValue([REDACTED])");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "wJalrXUtnFEMI");
    }

    #[test]
    fn secret_value_from_non_string_json() {
        assert_eq!(SecretValue::from_json(&json!(42)).expose(), "42");
        assert_eq!(SecretValue::from_json(&json!("abc")).expose(), "abc");
    }

    #[test]
    fn credentials_debug_hides_token() {
        let creds = ClusterCredentials {
            certificate_authority: "ca".into(),
            token: Some(SecretValue::new("t0ken")),
        };
        assert!(!format!("{creds:?}").contains("t0ken"));
    }

    #[test]
    fn provider_error_retryable_flag() {
        assert!(ProviderError::retryable("throttled").retryable);
        assert!(!ProviderError::new("denied").retryable);
        assert_eq!(ProviderError::new("denied").to_string(), "provider error: denied");
    }
}
