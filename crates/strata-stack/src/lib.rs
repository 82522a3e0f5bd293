//! Strata Stack
//!
//! The build-runner cluster declared for the Strata engine: network, worker
//! role, cluster with an autoscaled managed nodegroup, an image repository
//! with a push user and its access key. [`declare_stack`] turns a
//! [`StackConfig`] into declarations and outputs; [`simulate`] runs them
//! against in-memory collaborators.

pub mod config;
pub mod error;
pub mod simulate;
pub mod stack;

pub use config::{IngressChart, StackConfig};
pub use error::StackError;
pub use simulate::{plan, simulate, stack_provisioner, Simulation, Simulator};
pub use stack::{declare_stack, ids, Stack};
