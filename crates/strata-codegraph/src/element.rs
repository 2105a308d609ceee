//! Code elements extracted from source files

use crate::language::Language;
use serde::{Deserialize, Serialize};

/// Kind of definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// A source file
    Module,
    /// Python class, Rust struct/enum/trait
    Class,
    /// Free function
    Function,
    /// Function defined inside a class, impl or trait
    Method,
}

impl ElementKind {
    /// Whether calls can originate from this element
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::Method)
    }
}

/// Where a definition lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Path relative to the project root, `/`-separated
    pub file: String,
    /// First line (1-based)
    pub start_line: usize,
    /// Last line (1-based, inclusive)
    pub end_line: usize,
}

/// A module, class, function or method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeElement {
    /// Dotted path, e.g. `app.models.User.save`
    pub id: String,
    /// Short name
    pub name: String,
    /// Kind of definition
    pub kind: ElementKind,
    /// Language of the defining file
    pub language: Language,
    /// Dotted module containing this element
    pub module: String,
    /// Enclosing class, if any
    pub parent: Option<String>,
    /// Location in the project
    pub location: SourceLocation,
    /// Raw source text
    pub source: String,
    /// Documentation string or `///` comment
    pub docstring: Option<String>,
    /// Declaration line(s) without the body
    pub signature: Option<String>,
    /// Parameters as written
    pub parameters: Vec<String>,
    /// Return annotation as written
    pub return_annotation: Option<String>,
    /// Modules this element's file imports (set on modules)
    pub imports: Vec<String>,
    /// Short names of everything this element calls, in first-seen order
    pub calls: Vec<String>,
    /// Ids of resolved callers, filled once the graph is built
    pub callers: Vec<String>,
    /// Cyclomatic complexity of `source`
    pub complexity: u32,
}
