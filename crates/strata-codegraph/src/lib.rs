//! Strata Code Graph
//!
//! Parses Python and Rust sources with tree-sitter into a read-only graph of
//! modules, classes, functions and methods, with:
//! - call edges resolved heuristically and tagged with a [`Confidence`]
//! - module import edges
//! - per-element cyclomatic complexity
//! - [`CodeGraph::context_for`] snapshots for prompt building
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_codegraph::{analyze_project, DEFAULT_EXCLUDES};
//!
//! let graph = analyze_project("path/to/project", DEFAULT_EXCLUDES)?;
//! if let Some(ctx) = graph.context_for("app.models.User.save", 2) {
//!     println!("{}", ctx.render());
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod analyze;
pub mod complexity;
pub mod context;
pub mod element;
pub mod error;
pub mod extract;
pub mod graph;
pub mod language;

pub use analyze::{analyze_project, DEFAULT_EXCLUDES};
pub use complexity::{cyclomatic_complexity, node_complexity};
pub use context::{ContextEntry, ElementContext};
pub use element::{CodeElement, ElementKind, SourceLocation};
pub use error::AnalysisError;
pub use extract::{parse_source, ParsedFile};
pub use graph::{
    CodeGraph, CodeGraphBuilder, Confidence, DependencyKind, GraphStats, ResolvedCall,
    UnresolvedCall,
};
pub use language::Language;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
