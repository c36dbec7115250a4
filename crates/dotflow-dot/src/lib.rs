//! Parser for the DOT-like graph language used by dotflow workflows.
//!
//! Parses `digraph Name { ... }` with node/edge statements, default-attribute
//! statements, subgraphs, and typed attributes into a [`Graph`] of [`Node`]s and
//! [`Edge`]s. Each node remembers which attributes were authored explicitly.
//!
//! # Example
//! ```
//! let dot = r#"digraph Pipeline { start -> process -> done }"#;
//! let graph = dotflow_dot::parse(dot).unwrap();
//! assert_eq!(graph.id, "Pipeline");
//! assert_eq!(graph.edges.len(), 2);
//! ```

pub mod ast;
mod duration;
mod parser;

pub use ast::*;
pub use duration::parse_duration;
pub use parser::{derive_class_name, parse};
