//! Supported source languages

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python
    Python,
    /// Rust
    Rust,
}

impl Language {
    /// Every supported language
    pub const ALL: [Language; 2] = [Language::Python, Language::Rust];

    /// Get file extensions for this language
    #[inline]
    #[must_use]
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py"],
            Language::Rust => &["rs"],
        }
    }

    /// Get human-readable name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Rust => "rust",
        }
    }

    /// Detect language from a file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext))
    }

    /// Tree-sitter grammar
    #[must_use]
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }

    /// Dotted module name for a `/`-separated path relative to the project
    /// root.
    ///
    /// Python packages drop `__init__`; Rust drops a leading `src` and the
    /// `mod`/`lib`/`main` file stems, and the crate root becomes `crate`.
    #[must_use]
    pub fn module_name(&self, rel_path: &str) -> String {
        let mut parts: Vec<&str> = rel_path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
        let Some(last) = parts.pop() else {
            return String::new();
        };
        let stem = last.rsplit_once('.').map_or(last, |(stem, _)| stem);

        match self {
            Language::Python => {
                if stem != "__init__" || parts.is_empty() {
                    parts.push(stem);
                }
            }
            Language::Rust => {
                if parts.first() == Some(&"src") {
                    parts.remove(0);
                }
                if !matches!(stem, "mod" | "lib" | "main") {
                    parts.push(stem);
                }
                if parts.is_empty() {
                    parts.push("crate");
                }
            }
        }
        parts.join(".")
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
