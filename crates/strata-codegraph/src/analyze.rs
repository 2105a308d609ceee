//! Project discovery and analysis

use crate::error::AnalysisError;
use crate::extract::parse_source;
use crate::graph::{CodeGraph, CodeGraphBuilder};
use crate::language::Language;
use std::path::Path;
use strata_common::pattern::normalize;
use strata_common::PathPattern;
use walkdir::WalkDir;

/// Directories nobody wants analyzed
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "target",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    ".tox",
];

/// Parse every supported source file under `root` that no exclude pattern
/// matches, and resolve the result into a [`CodeGraph`].
///
/// Patterns are matched against paths relative to `root`. Files that cannot
/// be read or parsed are logged and skipped.
///
/// # Errors
/// Returns an error if `root` is not a directory or a pattern is invalid
pub fn analyze_project<S: AsRef<str>>(
    root: impl AsRef<Path>,
    exclude_patterns: &[S],
) -> Result<CodeGraph, AnalysisError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(AnalysisError::InvalidRoot(root.to_path_buf()));
    }
    let excludes = PathPattern::new(exclude_patterns)?;
    let mut builder = CodeGraphBuilder::new().with_root(root);

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || entry
                    .path()
                    .strip_prefix(root)
                    .map_or(true, |rel| !excludes.is_match(rel))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(language) = Language::from_path(entry.path()) else {
            continue;
        };
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = normalize(rel);

        let source = match std::fs::read_to_string(entry.path()) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(file = %rel, error = %err, "skipping unreadable file");
                builder.record_skipped(rel);
                continue;
            }
        };
        let added = builder.add_source(&rel, &source, language).map(|_| ());
        if let Err(err) = added {
            tracing::warn!(file = %rel, error = %err, "skipping unparseable file");
            builder.record_skipped(rel);
        }
    }

    let graph = builder.build();
    let stats = graph.stats();
    tracing::info!(
        root = %root.display(),
        files = stats.files,
        call_edges = stats.call_edges,
        unresolved = stats.unresolved_calls,
        skipped = stats.skipped_files,
        "project analyzed"
    );
    Ok(graph)
}
