//! Strata Engine
//!
//! Runs a validated resource graph against external collaborators.
//!
//! ## Phases
//!
//! 1. **Substrate**: provider-level resources are realized batch by batch
//!    through a [`Provisioner`]. Each node's references are resolved from
//!    the attributes its dependencies reported when they became live.
//! 2. **Workload**: once every substrate node is live and each target
//!    cluster exposes its endpoint and credentials, in-cluster documents are
//!    applied through a [`ClusterApplier`].
//!
//! Outputs are bound last. Sensitive values go only to the [`SecretStore`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_engine::prelude::*;
//! use strata_engine::simulator::{InMemoryProvisioner, InMemorySecretStore, RecordingApplier};
//!
//! let coordinator = DeployCoordinator::new(
//!     Arc::new(InMemoryProvisioner::default()),
//!     Arc::new(RecordingApplier::new()),
//!     Arc::new(InMemorySecretStore::new()),
//! );
//! let result = coordinator.apply(declarations, &outputs).await?;
//! assert!(result.is_success());
//! ```

pub mod capability;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod outputs;
pub mod redact;
pub mod resolver;
pub mod scheduler;
pub mod simulator;
pub mod state_machine;

pub use capability::{
    ApplyError, ClusterApplier, ClusterConnection, ClusterCredentials, ClusterEndpoint,
    ConcreteProperties, LiveAttributes, ManifestDocument, ProviderError, ProvisionRequest,
    Provisioner, SecretStore, SecretValue, StoreError,
};
pub use config::{ConnectionAttributes, EngineConfig};
pub use coordinator::{
    DeployCoordinator, DeployFailure, DeployResult, DeployStatus, DestroyResult, PhasedPlan,
};
pub use error::{ConfigError, DeployError, FailureCause, NodeFailure, ResolveError};
pub use executor::{NodeExecutor, SubstrateExecutor, WorkloadExecutor};
pub use outputs::{Output, OutputBinder, OutputError, OutputSpec, OutputValue};
pub use resolver::{AttributeStore, Resolver};
pub use scheduler::{PhaseOutcome, Scheduler};
pub use state_machine::{DeployState, Transition};

/// Common imports for running deploys
pub mod prelude {
    pub use crate::{
        ClusterApplier, DeployCoordinator, DeployError, DeployResult, DeployState, DeployStatus,
        EngineConfig, OutputSpec, Provisioner, SecretStore, SecretValue,
    };
    pub use strata_graph::prelude::*;
}
