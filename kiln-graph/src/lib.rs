//! The target dependency graph: a directed acyclic graph of build targets
//! with cycle detection, topological ordering, and critical-path analysis.
//!
//! # Example
//!
//! ```
//! use kiln_graph::{BuildGraph, Target, TargetId, TargetType, ValidationMode};
//!
//! let mut graph = BuildGraph::new(ValidationMode::Immediate);
//! graph.add_target(Target {
//!     id: TargetId::new("//lib:a"),
//!     target_type: TargetType::Library,
//!     language: "rust".into(),
//!     sources: vec!["a.rs".into()],
//!     dependencies: vec![],
//!     output_hints: vec![],
//!     config: serde_json::Value::Null,
//! }).unwrap();
//! graph.link_dependencies().unwrap();
//! let order = graph.validate().unwrap();
//! assert_eq!(order.len(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod build;
mod dag;

pub use build::{BuildGraph, BuildNode, BuildStatus, Target, TargetId, TargetType, ValidationMode};
pub use dag::{Dag, GraphError, GraphResult, NodeId};
