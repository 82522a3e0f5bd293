//! Property values: literals, references to other nodes, and composites.

use crate::template::Template;
use crate::types::{AttrRef, NodeId};
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// A declared property value.
///
/// Literals are known at declaration time. References name an attribute of
/// another node and are only bound once that node is live. Lists, maps and
/// templates may contain references at any depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Concrete JSON value
    Literal(Json),
    /// Attribute of another node, resolved during apply
    Reference(AttrRef),
    /// Ordered list of values
    List(Vec<Value>),
    /// Named values
    Map(BTreeMap<String, Value>),
    /// Prepared document with placeholder bindings
    Template(Template),
}

impl Value {
    /// Reference to `node.attribute`
    #[inline]
    #[must_use]
    pub fn reference(node: impl Into<NodeId>, attribute: impl Into<String>) -> Self {
        Self::Reference(AttrRef::new(node, attribute))
    }

    /// List built from anything convertible into values
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Map built from name/value pairs
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Whether the value needs no resolution
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.references().is_empty()
    }

    /// Every reference contained in this value, including template bindings
    #[must_use]
    pub fn references(&self) -> Vec<&AttrRef> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a AttrRef>) {
        match self {
            Value::Literal(_) => {}
            Value::Reference(r) => out.push(r),
            Value::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            Value::Template(template) => template
                .bindings()
                .values()
                .for_each(|v| v.collect_references(out)),
        }
    }

    /// Every template contained in this value
    #[must_use]
    pub fn templates(&self) -> Vec<&Template> {
        let mut out = Vec::new();
        self.collect_templates(&mut out);
        out
    }

    fn collect_templates<'a>(&'a self, out: &mut Vec<&'a Template>) {
        match self {
            Value::Literal(_) | Value::Reference(_) => {}
            Value::List(items) => items.iter().for_each(|v| v.collect_templates(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_templates(out)),
            Value::Template(template) => {
                out.push(template);
                template
                    .bindings()
                    .values()
                    .for_each(|v| v.collect_templates(out));
            }
        }
    }
}

impl From<Json> for Value {
    fn from(value: Json) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Literal(Json::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Literal(Json::String(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Literal(Json::Bool(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Literal(Json::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Literal(Json::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Literal(Json::from(value))
    }
}

impl From<AttrRef> for Value {
    fn from(value: AttrRef) -> Self {
        Self::Reference(value)
    }
}

impl From<Template> for Value {
    fn from(value: Template) -> Self {
        Self::Template(value)
    }
}
