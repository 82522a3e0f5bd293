//! Engine configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Attribute names that make up a cluster connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionAttributes {
    /// Attribute holding the API endpoint
    pub endpoint: String,
    /// Attribute holding the certificate authority data
    pub certificate_authority: String,
    /// Attribute holding an optional bearer token
    pub token: String,
}

impl Default for ConnectionAttributes {
    fn default() -> Self {
        Self {
            endpoint: "endpoint".to_string(),
            certificate_authority: "certificate_authority".to_string(),
            token: "token".to_string(),
        }
    }
}

/// Deploy engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nodes driven at once within one batch
    pub max_concurrency: usize,
    /// Prefix for secret keys of sensitive outputs without an explicit key
    pub secret_prefix: String,
    /// Cluster connection attribute names
    pub cluster_connection: ConnectionAttributes,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            secret_prefix: String::new(),
            cluster_connection: ConnectionAttributes::default(),
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With maximum batch concurrency
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// With secret key prefix
    #[inline]
    #[must_use]
    pub fn with_secret_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.secret_prefix = prefix.into();
        self
    }

    /// With cluster connection attribute names
    #[inline]
    #[must_use]
    pub fn with_cluster_connection(mut self, attributes: ConnectionAttributes) -> Self {
        self.cluster_connection = attributes;
        self
    }

    /// Parse a TOML document; missing keys take their defaults
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed TOML, `ConfigError::Invalid` when a
    /// value is out of range.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        let names = &self.cluster_connection;
        if names.endpoint.is_empty() || names.certificate_authority.is_empty() {
            return Err(ConfigError::Invalid(
                "cluster_connection attribute names must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.max_concurrency, 8);
        assert!(config.secret_prefix.is_empty());
        assert_eq!(config.cluster_connection.endpoint, "endpoint");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            secret_prefix = "ci/"

            [cluster_connection]
            endpoint = "api_url"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.secret_prefix, "ci/");
        assert_eq!(config.cluster_connection.endpoint, "api_url");
        assert_eq!(config.cluster_connection.certificate_authority, "certificate_authority");
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(matches!(
            EngineConfig::from_toml_str("max_concurrency = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("max_concurrency = "),
            Err(ConfigError::Parse(_))
        ));
    }
}
