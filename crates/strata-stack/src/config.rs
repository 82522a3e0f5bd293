//! Stack configuration
//!
//! Every key is optional in TOML; missing keys take the defaults of the
//! build-runner cluster. The `[engine]` table configures the deploy engine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_engine::{ConfigError, EngineConfig};

/// Helm chart installed in the workload phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressChart {
    /// Release name
    pub release: String,
    /// Chart repository URL
    pub repository: String,
    /// Chart name
    pub chart: String,
    /// Chart version; latest when absent
    #[serde(default)]
    pub version: Option<String>,
    /// Target namespace
    #[serde(default = "default_ingress_namespace")]
    pub namespace: String,
}

fn default_ingress_namespace() -> String {
    "ingress".to_string()
}

/// Build-runner cluster stack configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Cluster name; prefixes every named resource
    pub cluster_name: String,
    /// Kubernetes control plane version
    pub kubernetes_version: String,
    /// Cluster autoscaler image tag
    pub autoscaler_image_tag: String,
    /// Nodegroup instance types
    pub instance_types: Vec<String>,
    /// Nodegroup AMI type
    pub ami_type: String,
    /// Minimum nodegroup size
    pub min_size: u32,
    /// Maximum nodegroup size
    pub max_size: u32,
    /// Images older than this are expired from the repository
    pub max_image_age_days: u32,
    /// Optional ingress controller
    pub ingress: Option<IngressChart>,
    /// Deploy engine settings
    pub engine: EngineConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            cluster_name: "test-runner-cluster".to_string(),
            kubernetes_version: "1.21".to_string(),
            autoscaler_image_tag: "v1.21.1".to_string(),
            instance_types: vec!["c7g.2xlarge".to_string()],
            ami_type: "AL2_ARM_64".to_string(),
            min_size: 2,
            max_size: 80,
            max_image_age_days: 365,
            ingress: None,
            engine: EngineConfig::default(),
        }
    }
}

impl StackConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With cluster name
    #[inline]
    #[must_use]
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// With nodegroup size bounds
    #[inline]
    #[must_use]
    pub fn with_node_range(mut self, min: u32, max: u32) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    /// With an ingress controller chart
    #[inline]
    #[must_use]
    pub fn with_ingress(mut self, chart: IngressChart) -> Self {
        self.ingress = Some(chart);
        self
    }

    /// With deploy engine settings
    #[inline]
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Parse a TOML document
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
    /// [`StackConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges, including the engine table
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_name.is_empty() {
            return Err(ConfigError::Invalid("cluster_name must not be empty".into()));
        }
        if self.instance_types.is_empty() {
            return Err(ConfigError::Invalid("instance_types must not be empty".into()));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::Invalid(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.max_image_age_days == 0 {
            return Err(ConfigError::Invalid("max_image_age_days must be at least 1".into()));
        }
        self.engine.validate()
    }
}
