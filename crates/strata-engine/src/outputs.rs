//! Output binding.
//!
//! Plain outputs are emitted with their resolved value. Sensitive outputs
//! are written to the [`SecretStore`] and emitted only as a reference to
//! the secret key; their value exists in memory as a [`SecretValue`] and
//! nowhere else.

use crate::capability::{SecretStore, SecretValue};
use crate::error::{DeployError, FailureCause, NodeFailure};
use crate::resolver::AttributeStore;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::HashMap;
use strata_graph::{AttrRef, NodeId, ResourceGraph, ResourceType};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Plain output emitted next to a sensitive one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Companion {
    /// Output name
    pub name: String,
    /// Attribute it reads
    pub source: AttrRef,
}

/// Declared stack output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// Output name
    pub name: String,
    /// Attribute it reads
    pub source: AttrRef,
    /// Route the value through the secret store
    pub sensitive: bool,
    /// Secret key, overriding `{secret_prefix}{name}`
    pub secret_key: Option<String>,
    /// Plain output emitted alongside a sensitive one
    pub companion: Option<Companion>,
}

impl OutputSpec {
    /// Plain output of `node.attribute`
    #[must_use]
    pub fn plain(
        name: impl Into<String>,
        node: impl Into<NodeId>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: AttrRef::new(node, attribute),
            sensitive: false,
            secret_key: None,
            companion: None,
        }
    }

    /// Sensitive output of `node.attribute`
    #[must_use]
    pub fn sensitive(
        name: impl Into<String>,
        node: impl Into<NodeId>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            sensitive: true,
            ..Self::plain(name, node, attribute)
        }
    }

    /// With an explicit secret key
    #[must_use]
    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    /// With a plain companion output
    #[must_use]
    pub fn with_companion(
        mut self,
        name: impl Into<String>,
        node: impl Into<NodeId>,
        attribute: impl Into<String>,
    ) -> Self {
        self.companion = Some(Companion {
            name: name.into(),
            source: AttrRef::new(node, attribute),
        });
        self
    }

    /// Secret key used for a sensitive output
    #[must_use]
    pub fn storage_key(&self, prefix: &str) -> String {
        self.secret_key
            .clone()
            .unwrap_or_else(|| format!("{prefix}{}", self.name))
    }

    fn sources(&self) -> impl Iterator<Item = &AttrRef> {
        std::iter::once(&self.source).chain(self.companion.as_ref().map(|c| &c.source))
    }
}

/// Emitted value of an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputValue {
    /// Resolved value
    Plain {
        /// Value
        value: Json,
    },
    /// Key under which the secret store holds the value
    SecretRef {
        /// Secret key
        key: String,
    },
}

/// Emitted output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Output {
    /// Output name
    pub name: String,
    /// Emitted value
    pub value: OutputValue,
    /// Whether the value went through the secret store
    pub sensitive: bool,
}

impl Output {
    /// Plain value, if the output is not sensitive
    #[must_use]
    pub fn plain_value(&self) -> Option<&Json> {
        match &self.value {
            OutputValue::Plain { value } => Some(value),
            OutputValue::SecretRef { .. } => None,
        }
    }
}

/// Why outputs could not be bound
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    /// An output reads an attribute that is not resolved
    #[error("output `{output}` reads `{attribute}`, which is not resolved")]
    Unresolved {
        /// Output name
        output: String,
        /// Attribute the output reads
        attribute: AttrRef,
    },

    /// The secret store refused a sensitive value
    #[error("output `{output}`: {failure}")]
    Store {
        /// Output name
        output: String,
        /// Failure attributed to the output's source node
        failure: NodeFailure,
    },
}

/// Check that every output reads from a declared node, and that no plain
/// output or companion reads the source of a sensitive output
///
/// # Errors
/// `DeployError::UnknownOutputSource` for the first spec naming an
/// undeclared node; `DeployError::SensitiveSourceExposed` for the first
/// plain output sharing a sensitive source.
pub fn validate_specs(graph: &ResourceGraph, specs: &[OutputSpec]) -> Result<(), DeployError> {
    for spec in specs {
        for source in spec.sources() {
            if !graph.contains(&source.node) {
                return Err(DeployError::UnknownOutputSource {
                    output: spec.name.clone(),
                    node: source.node.clone(),
                });
            }
        }
    }

    let sensitive: HashMap<&AttrRef, &str> = specs
        .iter()
        .filter(|spec| spec.sensitive)
        .map(|spec| (&spec.source, spec.name.as_str()))
        .collect();
    for (output, source) in plain_sources(specs) {
        if let Some(name) = sensitive.get(source) {
            return Err(DeployError::SensitiveSourceExposed {
                output: output.to_string(),
                sensitive: (*name).to_string(),
                attribute: source.clone(),
            });
        }
    }
    Ok(())
}

fn plain_sources(specs: &[OutputSpec]) -> impl Iterator<Item = (&str, &AttrRef)> {
    specs.iter().flat_map(|spec| {
        let own = (!spec.sensitive).then_some((spec.name.as_str(), &spec.source));
        let companion = spec.companion.as_ref().map(|c| (c.name.as_str(), &c.source));
        own.into_iter().chain(companion)
    })
}

enum Pending {
    Plain(String, Json),
    Secret {
        name: String,
        key: String,
        value: SecretValue,
        source: AttrRef,
    },
}

/// Binds resolved attributes to outputs
pub struct OutputBinder<'a> {
    secrets: &'a dyn SecretStore,
    secret_prefix: &'a str,
}

impl<'a> OutputBinder<'a> {
    /// Create a binder writing sensitive values to `secrets`
    #[must_use]
    pub fn new(secrets: &'a dyn SecretStore, secret_prefix: &'a str) -> Self {
        Self { secrets, secret_prefix }
    }

    /// Bind every spec, in declaration order.
    ///
    /// All values are looked up before the first secret is written, so an
    /// unresolved output never leaves a partial set of secrets behind.
    ///
    /// # Errors
    /// `OutputError::Unresolved` if a source attribute is missing from
    /// `store`; `OutputError::Store` if the secret store refuses a value.
    #[instrument(skip_all, fields(outputs = specs.len()))]
    pub async fn collect(
        &self,
        graph: &ResourceGraph,
        store: &AttributeStore,
        specs: &[OutputSpec],
    ) -> Result<Vec<Output>, OutputError> {
        let mut pending = Vec::with_capacity(specs.len());
        for spec in specs {
            let value = lookup(store, &spec.name, &spec.source)?;
            if spec.sensitive {
                pending.push(Pending::Secret {
                    name: spec.name.clone(),
                    key: spec.storage_key(self.secret_prefix),
                    value: SecretValue::from_json(value),
                    source: spec.source.clone(),
                });
            } else {
                pending.push(Pending::Plain(spec.name.clone(), value.clone()));
            }
            if let Some(companion) = &spec.companion {
                let value = lookup(store, &companion.name, &companion.source)?;
                pending.push(Pending::Plain(companion.name.clone(), value.clone()));
            }
        }

        let mut outputs = Vec::with_capacity(pending.len());
        for item in pending {
            match item {
                Pending::Plain(name, value) => {
                    debug!(output = %name, "plain output bound");
                    outputs.push(Output {
                        name,
                        value: OutputValue::Plain { value },
                        sensitive: false,
                    });
                }
                Pending::Secret { name, key, value, source } => {
                    if let Err(err) = self.secrets.store(&key, &value).await {
                        let failure = source_failure(graph, &source, err.into());
                        warn!(output = %name, "{failure}");
                        return Err(OutputError::Store { output: name, failure });
                    }
                    info!(output = %name, key = %key, "sensitive output stored");
                    outputs.push(Output {
                        name,
                        value: OutputValue::SecretRef { key },
                        sensitive: true,
                    });
                }
            }
        }
        Ok(outputs)
    }
}

fn lookup<'s>(
    store: &'s AttributeStore,
    output: &str,
    source: &AttrRef,
) -> Result<&'s Json, OutputError> {
    store.lookup(source).ok_or_else(|| OutputError::Unresolved {
        output: output.to_string(),
        attribute: source.clone(),
    })
}

fn source_failure(graph: &ResourceGraph, source: &AttrRef, cause: FailureCause) -> NodeFailure {
    let node = graph.node(&source.node);
    NodeFailure {
        node: source.node.clone(),
        resource_type: node
            .map_or_else(|| ResourceType::from("unknown"), |n| n.resource_type().clone()),
        phase: node.map(|n| n.phase()).unwrap_or_default(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StoreError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use strata_graph::{GraphBuilder, Phase, ResourceDecl};

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<Vec<(String, SecretValue)>>,
        refuse: bool,
    }

    #[async_trait]
    impl SecretStore for MemoryStore {
        async fn store(&self, name: &str, value: &SecretValue) -> Result<(), StoreError> {
            if self.refuse {
                return Err(StoreError::new("access denied"));
            }
            self.values.lock().push((name.to_string(), value.clone()));
            Ok(())
        }
    }

    fn setup() -> (ResourceGraph, AttributeStore) {
        let mut builder = GraphBuilder::new();
        builder.add_node(ResourceDecl::new("key", "iam.access_key"));
        let graph = builder.build().unwrap();
        let mut store = AttributeStore::new();
        store
            .record(
                NodeId::new("key"),
                [
                    ("id".to_string(), json!("AKIAEXAMPLE")),
                    ("secret_access_key".to_string(), json!("wJalrXUtnFEMI")),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap();
        (graph, store)
    }

    #[tokio::test]
    async fn sensitive_value_goes_only_to_the_store() {
        let (graph, store) = setup();
        let secrets = MemoryStore::default();
        let specs = vec![
            OutputSpec::plain("accessKeyId", "key", "id"),
            OutputSpec::sensitive("secretAccessKey", "key", "secret_access_key"),
        ];

        let outputs = OutputBinder::new(&secrets, "ci/")
            .collect(&graph, &store, &specs)
            .await
            .unwrap();

        assert_eq!(outputs[0].plain_value(), Some(&json!("AKIAEXAMPLE")));
        assert_eq!(
            outputs[1].value,
            OutputValue::SecretRef {
                key: "ci/secretAccessKey".into()
            }
        );
        let rendered = format!("{outputs:?}");
        assert!(!rendered.contains("wJalrXUtnFEMI"));
        let stored = secrets.values.lock();
        assert_eq!(stored[0].0, "ci/secretAccessKey");
        assert_eq!(stored[0].1.expose(), "wJalrXUtnFEMI");
    }

    #[tokio::test]
    async fn companion_and_key_override() {
        let (graph, store) = setup();
        let secrets = MemoryStore::default();
        let specs = vec![OutputSpec::sensitive("secretAccessKey", "key", "secret_access_key")
            .with_secret_key("runner/aws-secret")
            .with_companion("accessKeyIdForSecret", "key", "id")];

        let outputs = OutputBinder::new(&secrets, "")
            .collect(&graph, &store, &specs)
            .await
            .unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].name, "accessKeyIdForSecret");
        assert_eq!(secrets.values.lock()[0].0, "runner/aws-secret");
    }

    #[tokio::test]
    async fn unresolved_output_writes_no_secret() {
        let (graph, store) = setup();
        let secrets = MemoryStore::default();
        let specs = vec![
            OutputSpec::sensitive("secretAccessKey", "key", "secret_access_key"),
            OutputSpec::plain("missing", "key", "nope"),
        ];

        let err = OutputBinder::new(&secrets, "")
            .collect(&graph, &store, &specs)
            .await
            .unwrap_err();

        assert!(matches!(err, OutputError::Unresolved { .. }));
        assert!(secrets.values.lock().is_empty());
    }

    #[tokio::test]
    async fn store_failure_names_source_node() {
        let (graph, store) = setup();
        let secrets = MemoryStore {
            refuse: true,
            ..Default::default()
        };
        let specs = vec![OutputSpec::sensitive("secretAccessKey", "key", "secret_access_key")];

        let err = OutputBinder::new(&secrets, "")
            .collect(&graph, &store, &specs)
            .await
            .unwrap_err();

        let OutputError::Store { failure, .. } = err else {
            panic!("expected store failure");
        };
        assert_eq!(failure.node, NodeId::new("key"));
        assert_eq!(failure.phase, Phase::Substrate);
        assert_eq!(failure.resource_type.as_str(), "iam.access_key");
    }

    #[test]
    fn validate_rejects_undeclared_source() {
        let (graph, _) = setup();
        let specs = vec![OutputSpec::plain("x", "key", "id").with_companion("y", "ghost", "id")];
        assert_eq!(
            validate_specs(&graph, &specs),
            Err(DeployError::UnknownOutputSource {
                output: "x".into(),
                node: NodeId::new("ghost"),
            })
        );
    }

    #[test]
    fn validate_rejects_plain_copy_of_a_sensitive_source() {
        let (graph, _) = setup();
        let companion = vec![OutputSpec::sensitive("secretAccessKey", "key", "secret_access_key")
            .with_companion("keyHint", "key", "secret_access_key")];
        assert_eq!(
            validate_specs(&graph, &companion),
            Err(DeployError::SensitiveSourceExposed {
                output: "keyHint".into(),
                sensitive: "secretAccessKey".into(),
                attribute: AttrRef::new("key", "secret_access_key"),
            })
        );

        let plain_first = vec![
            OutputSpec::plain("debugCopy", "key", "secret_access_key"),
            OutputSpec::sensitive("secretAccessKey", "key", "secret_access_key"),
        ];
        assert!(matches!(
            validate_specs(&graph, &plain_first),
            Err(DeployError::SensitiveSourceExposed { output, .. }) if output == "debugCopy"
        ));
    }

    #[test]
    fn validate_allows_companion_of_another_attribute() {
        let (graph, _) = setup();
        let specs = vec![OutputSpec::sensitive("secretAccessKey", "key", "secret_access_key")
            .with_companion("accessKeyId", "key", "id")];
        assert!(validate_specs(&graph, &specs).is_ok());
    }
}
