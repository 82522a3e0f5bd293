//! Prepared templates for documents applied inside a cluster.
//!
//! A template is a JSON document containing placeholder tokens of the form
//! `__NAME__`. The document is scanned once, when the template is declared,
//! and the set of tokens is fixed from then on. Rendering replaces whole
//! tokens only: `__CLUSTER_NAME__` never matches inside
//! `__CLUSTER_NAME_SUFFIX__`.

use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"__([A-Z0-9]+(?:_[A-Z0-9]+)*)__").expect("placeholder pattern is valid")
});

/// JSON document with bound placeholder tokens
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    document: Json,
    bindings: BTreeMap<String, Value>,
    #[serde(skip)]
    placeholders: BTreeSet<String>,
}

impl Template {
    /// Prepare a template, collecting every placeholder in the document
    #[must_use]
    pub fn new(document: Json) -> Self {
        let mut placeholders = BTreeSet::new();
        collect_placeholders(&document, &mut placeholders);
        Self {
            document,
            bindings: BTreeMap::new(),
            placeholders,
        }
    }

    /// Bind a placeholder name (without the surrounding underscores) to a value
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// The unrendered document
    #[inline]
    #[must_use]
    pub fn document(&self) -> &Json {
        &self.document
    }

    /// Placeholder names found in the document
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    /// Bound values by placeholder name
    #[inline]
    #[must_use]
    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }

    /// Placeholders with no binding
    pub fn unbound(&self) -> impl Iterator<Item = &str> {
        self.placeholders
            .iter()
            .filter(|name| !self.bindings.contains_key(*name))
            .map(String::as_str)
    }

    /// Render the document with already-resolved binding values.
    ///
    /// A string that is exactly one token takes the bound value as-is, so a
    /// number stays a number. Tokens embedded in longer strings are spliced as
    /// text. Tokens missing from `resolved` are left untouched.
    #[must_use]
    pub fn render(&self, resolved: &BTreeMap<String, Json>) -> Json {
        render_value(&self.document, resolved)
    }
}

/// Format a placeholder name as it appears in a document
#[must_use]
pub fn token(name: &str) -> String {
    format!("__{name}__")
}

fn collect_placeholders(value: &Json, out: &mut BTreeSet<String>) {
    match value {
        Json::String(text) => {
            for captures in PLACEHOLDER.captures_iter(text) {
                out.insert(captures[1].to_string());
            }
        }
        Json::Array(items) => items.iter().for_each(|item| collect_placeholders(item, out)),
        Json::Object(map) => {
            for (key, item) in map {
                for captures in PLACEHOLDER.captures_iter(key) {
                    out.insert(captures[1].to_string());
                }
                collect_placeholders(item, out);
            }
        }
        _ => {}
    }
}

fn render_value(value: &Json, resolved: &BTreeMap<String, Json>) -> Json {
    match value {
        Json::String(text) => render_string(text, resolved),
        Json::Array(items) => {
            Json::Array(items.iter().map(|item| render_value(item, resolved)).collect())
        }
        // Keys stay strings, so every token in a key is spliced as text
        Json::Object(map) => Json::Object(
            map.iter()
                .map(|(key, item)| (splice(key, resolved), render_value(item, resolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_string(text: &str, resolved: &BTreeMap<String, Json>) -> Json {
    if let Some(captures) = PLACEHOLDER.captures(text) {
        let whole = captures.get(0).map(|m| m.as_str());
        if whole == Some(text) {
            if let Some(value) = resolved.get(&captures[1]) {
                return value.clone();
            }
            return Json::String(text.to_string());
        }
    } else {
        return Json::String(text.to_string());
    }

    Json::String(splice(text, resolved))
}

fn splice(text: &str, resolved: &BTreeMap<String, Json>) -> String {
    PLACEHOLDER
        .replace_all(text, |captures: &regex::Captures<'_>| {
            match resolved.get(&captures[1]) {
                Some(Json::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => captures[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn resolved(pairs: &[(&str, Json)]) -> BTreeMap<String, Json> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn collects_placeholders_from_nested_documents() {
        let template = Template::new(json!({
            "image": "registry/autoscaler:__IMAGE_TAG__",
            "args": ["--cluster=__CLUSTER_NAME__", "--balance"],
        }));
        let names: Vec<&str> = template.placeholders().collect();
        assert_eq!(names, vec!["CLUSTER_NAME", "IMAGE_TAG"]);
    }

    #[test]
    fn unbound_lists_missing_bindings() {
        let template = Template::new(json!("__A__ and __B__")).bind("A", "x");
        assert_eq!(template.unbound().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn render_splices_embedded_tokens() {
        let template = Template::new(json!({"image": "repo:__IMAGE_TAG__"}));
        let out = template.render(&resolved(&[("IMAGE_TAG", json!("v1.21.1"))]));
        assert_eq!(out, json!({"image": "repo:v1.21.1"}));
    }

    #[test]
    fn render_keeps_type_for_whole_token_strings() {
        let template = Template::new(json!({"replicas": "__REPLICAS__"}));
        let out = template.render(&resolved(&[("REPLICAS", json!(3))]));
        assert_eq!(out, json!({"replicas": 3}));
    }

    #[test]
    fn tokens_sharing_a_prefix_do_not_match_each_other() {
        let template = Template::new(json!([
            "__CLUSTER_NAME__",
            "__CLUSTER_NAME_SUFFIX__",
            "x-__CLUSTER_NAME__-y"
        ]));
        let out = template.render(&resolved(&[("CLUSTER_NAME", json!("prod"))]));
        assert_eq!(out, json!(["prod", "__CLUSTER_NAME_SUFFIX__", "x-prod-y"]));
    }

    #[test]
    fn adjacent_tokens_are_separate() {
        let template = Template::new(json!("__A____B__"));
        let names: Vec<&str> = template.placeholders().collect();
        assert_eq!(names, vec!["A", "B"]);
        let out = template.render(&resolved(&[("A", json!("1")), ("B", json!("2"))]));
        assert_eq!(out, json!("12"));
    }

    #[test]
    fn lowercase_text_is_not_a_placeholder() {
        let template = Template::new(json!("__init__ stays"));
        assert_eq!(template.placeholders().count(), 0);
    }

    #[test]
    fn placeholders_in_object_keys_are_collected_and_rendered() {
        let template = Template::new(json!({
            "labels": {"k8s.io/cluster-autoscaler/__CLUSTER_NAME__": "owned"},
            "__REPLICAS__": "__REPLICAS__"
        }));
        let names: Vec<&str> = template.placeholders().collect();
        assert_eq!(names, vec!["CLUSTER_NAME", "REPLICAS"]);

        let out = template.render(&resolved(&[
            ("CLUSTER_NAME", json!("prod")),
            ("REPLICAS", json!(2)),
        ]));
        assert_eq!(
            out,
            json!({
                "labels": {"k8s.io/cluster-autoscaler/prod": "owned"},
                "2": 2
            })
        );
    }

    #[test]
    fn token_formats_name() {
        assert_eq!(token("IMAGE_TAG"), "__IMAGE_TAG__");
    }
}
