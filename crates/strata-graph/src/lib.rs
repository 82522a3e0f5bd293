//! Strata Graph
//!
//! Declare-then-build data model for infrastructure provisioning:
//! 1. **Declare**: describe resources as pure data ([`ResourceDecl`]), with
//!    literal properties and [`Value::Reference`]s to attributes other
//!    resources will only have once they exist.
//! 2. **Build**: [`GraphBuilder::build`] induces edges from references and
//!    ordering hints, and rejects cycles, dangling references and phase
//!    inversions before anything touches a provider.
//! 3. **Plan**: [`ResourceGraph::plan_phase`] layers nodes into batches that
//!    are safe to provision concurrently.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_graph::prelude::*;
//!
//! let mut builder = GraphBuilder::new();
//! builder.add_node(ResourceDecl::new("R", "iam.role"));
//! builder.add_node(ResourceDecl::new("P", "iam.policy").attach_to("R"));
//!
//! let graph = builder.build()?;
//! assert_eq!(graph.plan().len(), 2);
//! ```

pub mod builder;
pub mod declaration;
pub mod error;
pub mod graph;
pub mod plan;
pub mod template;
pub mod types;
pub mod value;

pub use builder::GraphBuilder;
pub use declaration::ResourceDecl;
pub use error::GraphError;
pub use graph::{Edge, EdgeKind, ResourceGraph, ResourceNode};
pub use plan::DeploymentPlan;
pub use template::Template;
pub use types::{AttrRef, NodeId, OrderingHint, Phase, Relation, ResourceType};
pub use value::Value;

/// Common imports for declaring and building graphs
pub mod prelude {
    pub use crate::{
        AttrRef, DeploymentPlan, GraphBuilder, GraphError, NodeId, Phase, ResourceDecl,
        ResourceGraph, ResourceNode, ResourceType, Template, Value,
    };
}
