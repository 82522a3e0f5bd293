//! Deferred reference resolution.
//!
//! Attributes enter the [`AttributeStore`] only after a collaborator confirms
//! the node is live, and each node is recorded at most once per run. The
//! scheduler resolves a node only after every dependency has been recorded,
//! so an unresolved reference here is an invariant violation, not a user
//! error.

use crate::capability::{ConcreteProperties, LiveAttributes};
use crate::error::ResolveError;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use strata_graph::{AttrRef, NodeId, ResourceNode, Value};

/// Live attributes recorded so far in one run
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    resolved: HashMap<NodeId, LiveAttributes>,
}

impl AttributeStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the live attributes of a node
    ///
    /// # Errors
    /// `ResolveError::AlreadyResolved` if the node was recorded before.
    pub fn record(&mut self, node: NodeId, attributes: LiveAttributes) -> Result<(), ResolveError> {
        if self.resolved.contains_key(&node) {
            return Err(ResolveError::AlreadyResolved(node));
        }
        self.resolved.insert(node, attributes);
        Ok(())
    }

    /// One attribute of a live node
    #[must_use]
    pub fn attribute(&self, node: &NodeId, name: &str) -> Option<&Json> {
        self.resolved.get(node).and_then(|attrs| attrs.get(name))
    }

    /// Value a reference points at
    #[must_use]
    pub fn lookup(&self, reference: &AttrRef) -> Option<&Json> {
        self.attribute(&reference.node, &reference.attribute)
    }

    /// Every attribute of a live node
    #[must_use]
    pub fn attributes(&self, node: &NodeId) -> Option<&LiveAttributes> {
        self.resolved.get(node)
    }

    /// Whether the node has been recorded
    #[must_use]
    pub fn is_live(&self, node: &NodeId) -> bool {
        self.resolved.contains_key(node)
    }

    /// Number of live nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Whether no node is live yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Substitutes references with recorded attribute values
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver;

impl Resolver {
    /// Concrete properties of `node`
    ///
    /// # Errors
    /// `ResolveError::UnresolvedReference` for the first reference whose
    /// target attribute is not in `store`.
    pub fn resolve(
        node: &ResourceNode,
        store: &AttributeStore,
    ) -> Result<ConcreteProperties, ResolveError> {
        node.properties()
            .iter()
            .map(|(name, value)| Ok((name.clone(), Self::resolve_value(node.id(), value, store)?)))
            .collect()
    }

    /// Concrete form of a single value declared on `owner`
    ///
    /// # Errors
    /// As [`Resolver::resolve`].
    pub fn resolve_value(
        owner: &NodeId,
        value: &Value,
        store: &AttributeStore,
    ) -> Result<Json, ResolveError> {
        match value {
            Value::Literal(json) => Ok(json.clone()),
            Value::Reference(reference) => {
                store
                    .lookup(reference)
                    .cloned()
                    .ok_or_else(|| ResolveError::UnresolvedReference {
                        node: owner.clone(),
                        target: reference.node.clone(),
                        attribute: reference.attribute.clone(),
                    })
            }
            Value::List(items) => items
                .iter()
                .map(|item| Self::resolve_value(owner, item, store))
                .collect::<Result<Vec<_>, _>>()
                .map(Json::Array),
            Value::Map(entries) => entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), Self::resolve_value(owner, item, store)?)))
                .collect::<Result<serde_json::Map<_, _>, ResolveError>>()
                .map(Json::Object),
            Value::Template(template) => {
                let bound = template
                    .bindings()
                    .iter()
                    .map(|(name, binding)| {
                        Ok((name.clone(), Self::resolve_value(owner, binding, store)?))
                    })
                    .collect::<Result<BTreeMap<_, _>, ResolveError>>()?;
                Ok(template.render(&bound))
            }
        }
    }
}
