//! Masking of secret-looking values before they reach a log line.

use crate::capability::ConcreteProperties;
use serde_json::Value as Json;

/// Replacement text for masked values
pub const REDACTED: &str = "[REDACTED]";

const SECRET_KEYWORDS: &[&str] = &["secret", "password", "token", "private_key", "access_key"];

/// Whether a property name looks like it holds a secret.
///
/// Matching ignores case and treats `-` and camelCase boundaries like `_`,
/// so `secretAccessKey`, `db-password` and `PRIVATE_KEY` all match.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    let normalized = normalize(key);
    SECRET_KEYWORDS.iter().any(|word| normalized.contains(word))
}

fn normalize(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.push(if c == '-' { '_' } else { c.to_ascii_lowercase() });
    }
    out
}

/// Copy of `value` with every entry under a secret-looking key masked
#[must_use]
pub fn redact_value(value: &Json) -> Json {
    match value {
        Json::Object(object) => Json::Object(
            object
                .iter()
                .map(|(key, child)| {
                    let child = if is_secret_key(key) {
                        Json::String(REDACTED.to_string())
                    } else {
                        redact_value(child)
                    };
                    (key.clone(), child)
                })
                .collect(),
        ),
        Json::Array(items) => Json::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// Loggable form of a node's concrete properties
#[must_use]
pub fn redact_properties(properties: &ConcreteProperties) -> Json {
    Json::Object(
        properties
            .iter()
            .map(|(key, value)| {
                let value = if is_secret_key(key) {
                    Json::String(REDACTED.to_string())
                } else {
                    redact_value(value)
                };
                (key.clone(), value)
            })
            .collect(),
    )
}
