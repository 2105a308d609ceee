//! Path patterns
//!
//! [`PathPattern`] compiles a list of glob expressions into a single
//! matcher. It backs both project exclude lists and cache invalidation by
//! pattern, so the two agree on what a pattern means.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Compiled set of glob patterns matched against `/`-separated paths.
///
/// A bare name without a separator (e.g. `venv`) matches that name as any
/// path component, so it excludes a whole directory tree wherever it
/// appears.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: Vec<String>,
    set: GlobSet,
}

impl PathPattern {
    /// Compile patterns into a matcher
    ///
    /// # Errors
    /// Returns [`PatternError`] if any pattern is not a valid glob
    pub fn new<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut raw = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            raw.push(pattern.to_string());

            for expanded in expand(pattern) {
                let glob = Glob::new(&expanded).map_err(|e| PatternError::InvalidGlob {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;
                builder.add(glob);
            }
        }

        let set = builder.build().map_err(|e| PatternError::InvalidGlob {
            pattern: raw.join(","),
            message: e.to_string(),
        })?;

        Ok(Self { raw, set })
    }

    /// Matcher that matches nothing
    #[must_use]
    pub fn empty() -> Self {
        Self {
            raw: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// Check whether `path` matches any pattern
    #[must_use]
    pub fn is_match(&self, path: impl AsRef<Path>) -> bool {
        if self.raw.is_empty() {
            return false;
        }
        let normalized = normalize(path.as_ref());
        self.set.is_match(normalized.trim_start_matches("./"))
    }

    /// The patterns this matcher was built from
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.raw
    }
}

impl Default for PathPattern {
    fn default() -> Self {
        Self::empty()
    }
}

fn expand(pattern: &str) -> Vec<String> {
    if pattern.contains('/') {
        return vec![pattern.to_string()];
    }
    vec![
        pattern.to_string(),
        format!("**/{pattern}"),
        format!("{pattern}/**"),
        format!("**/{pattern}/**"),
    ]
}

/// Render a path with forward slashes regardless of platform
#[must_use]
pub fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Pattern compilation errors
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    /// Glob syntax error
    #[error("invalid glob '{pattern}': {message}")]
    InvalidGlob {
        /// Offending pattern
        pattern: String,
        /// Parser message
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_matches_any_component() {
        let pattern = PathPattern::new(["venv"]).unwrap();
        assert!(pattern.is_match("venv/lib/site.py"));
        assert!(pattern.is_match("project/venv/lib/site.py"));
        assert!(!pattern.is_match("project/venvs.py"));
    }

    #[test]
    fn extension_glob_matches_nested_files() {
        let pattern = PathPattern::new(["*.pyc"]).unwrap();
        assert!(pattern.is_match("pkg/mod.pyc"));
        assert!(!pattern.is_match("pkg/mod.py"));
    }

    #[test]
    fn anchored_glob_respects_prefix() {
        let pattern = PathPattern::new(["src/**/*.py"]).unwrap();
        assert!(pattern.is_match("src/a/b.py"));
        assert!(pattern.is_match("./src/a/b.py"));
        assert!(!pattern.is_match("tests/a/b.py"));
    }

    #[test]
    fn empty_matches_nothing() {
        assert!(!PathPattern::empty().is_match("anything"));
        assert!(!PathPattern::new(["", "  "]).unwrap().is_match("anything"));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        assert!(PathPattern::new(["a[b"]).is_err());
    }
}
