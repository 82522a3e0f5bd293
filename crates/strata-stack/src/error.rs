use strata_engine::{ConfigError, DeployError};
use thiserror::Error;

/// Errors raised while declaring or running the stack
#[derive(Debug, Error)]
pub enum StackError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A bundled manifest is not valid JSON
    #[error("bundled manifest `{name}` is malformed: {source}")]
    Manifest {
        /// Asset name
        name: &'static str,
        /// Parse error
        source: serde_json::Error,
    },

    /// The engine rejected the stack or could not run it
    #[error(transparent)]
    Deploy(#[from] DeployError),
}
