//! Project-wide code graph
//!
//! Built once from parsed files and read-only afterwards. Holds three
//! petgraph views over the same elements:
//!
//! - call graph: caller → callee, weighted by resolution [`Confidence`]
//! - import graph: module → imported module
//! - dependency graph: the union of both

use crate::element::{CodeElement, ElementKind};
use crate::error::AnalysisError;
use crate::extract::{parse_source, ParsedFile};
use crate::language::Language;
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// How a call name was matched to a definition
///
/// Ordered from most to least trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Defined in the caller's own module
    SameModule,
    /// Defined in a module the caller's module imports
    ImportedModule,
    /// Only matched by short name somewhere in the project
    GlobalFallback,
}

impl Confidence {
    /// Whether the match is a bare name guess
    #[inline]
    #[must_use]
    pub fn is_low(&self) -> bool {
        matches!(self, Self::GlobalFallback)
    }
}

/// Edge of the dependency graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Resolved call
    Call(Confidence),
    /// Module import
    Import,
}

/// One resolved call edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCall {
    /// Calling element id
    pub caller: String,
    /// Called element id
    pub callee: String,
    /// Name as written at the call site
    pub name: String,
    /// How the name was matched
    pub confidence: Confidence,
}

/// A call name nothing in the project defines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedCall {
    /// Calling element id
    pub caller: String,
    /// Name as written at the call site
    pub name: String,
}

/// Summary counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// Parsed files
    pub files: usize,
    /// Class elements
    pub classes: usize,
    /// Free functions
    pub functions: usize,
    /// Methods
    pub methods: usize,
    /// Resolved call edges
    pub call_edges: usize,
    /// Module import edges
    pub import_edges: usize,
    /// Calls with no matching definition
    pub unresolved_calls: usize,
    /// Calls resolved by global fallback only
    pub low_confidence_edges: usize,
    /// Files that could not be read or parsed
    pub skipped_files: usize,
}

/// Accumulates parsed files, then resolves them into a [`CodeGraph`]
#[derive(Debug, Default)]
pub struct CodeGraphBuilder {
    root: Option<PathBuf>,
    files: Vec<ParsedFile>,
    skipped: Vec<String>,
}

impl CodeGraphBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the project root the files are relative to
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Parse and add one file
    ///
    /// # Errors
    /// Returns [`AnalysisError::Parse`] if the file cannot be parsed
    pub fn add_source(
        &mut self,
        rel_path: &str,
        source: &str,
        language: Language,
    ) -> Result<&mut Self, AnalysisError> {
        let parsed = parse_source(rel_path, source, language)?;
        self.files.push(parsed);
        Ok(self)
    }

    /// Add an already parsed file
    pub fn add_parsed(&mut self, parsed: ParsedFile) -> &mut Self {
        self.files.push(parsed);
        self
    }

    /// Note a file that was skipped
    pub fn record_skipped(&mut self, rel_path: impl Into<String>) -> &mut Self {
        self.skipped.push(rel_path.into());
        self
    }

    /// Resolve calls and imports into a graph
    #[must_use]
    pub fn build(self) -> CodeGraph {
        let mut graph = CodeGraph {
            root: self.root,
            skipped_files: self.skipped,
            ..CodeGraph::default()
        };

        for file in self.files {
            if graph.elements.contains_key(&file.module.id) {
                tracing::warn!(
                    module = %file.module.id,
                    file = %file.module.location.file,
                    "module name already defined, skipping file"
                );
                graph.skipped_files.push(file.module.location.file);
                continue;
            }
            graph.insert(file.module);
            for element in file.elements {
                graph.insert(element);
            }
        }

        graph.link_imports();
        graph.link_calls();
        graph
    }
}

/// Static call/import graph of a project
#[derive(Debug, Default)]
pub struct CodeGraph {
    root: Option<PathBuf>,
    elements: IndexMap<String, CodeElement>,
    by_name: HashMap<String, Vec<String>>,
    by_file: HashMap<String, Vec<String>>,
    callees: HashMap<String, Vec<(String, Confidence)>>,
    resolved: Vec<ResolvedCall>,
    unresolved: Vec<UnresolvedCall>,
    skipped_files: Vec<String>,
    call_graph: DiGraph<String, Confidence>,
    call_nodes: HashMap<String, NodeIndex>,
    import_graph: DiGraph<String, ()>,
    import_nodes: HashMap<String, NodeIndex>,
    dependency_graph: DiGraph<String, DependencyKind>,
    dependency_nodes: HashMap<String, NodeIndex>,
}

impl CodeGraph {
    /// Start building a graph
    #[must_use]
    pub fn builder() -> CodeGraphBuilder {
        CodeGraphBuilder::new()
    }

    /// Project root, if the graph came from a directory
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Element by id
    #[must_use]
    pub fn element(&self, id: &str) -> Option<&CodeElement> {
        self.elements.get(id)
    }

    /// All elements in insertion order
    pub fn elements(&self) -> impl Iterator<Item = &CodeElement> {
        self.elements.values()
    }

    /// Number of elements including modules
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether nothing was parsed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements defined in `file` (relative path), module first
    #[must_use]
    pub fn elements_in_file(&self, file: &str) -> Vec<&CodeElement> {
        let file = file.strip_prefix("./").unwrap_or(file);
        self.by_file
            .get(file)
            .map(|ids| ids.iter().filter_map(|id| self.elements.get(id)).collect())
            .unwrap_or_default()
    }

    /// Non-module elements with short name `name`
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Vec<&CodeElement> {
        self.by_name
            .get(name)
            .map(|ids| ids.iter().filter_map(|id| self.elements.get(id)).collect())
            .unwrap_or_default()
    }

    /// Element for a `file` or `file::symbol` style target.
    ///
    /// `symbol` may be a short name (`save`) or a dotted suffix
    /// (`User.save`); an empty symbol selects the module.
    #[must_use]
    pub fn locate(&self, file: &str, symbol: &str) -> Option<&CodeElement> {
        let in_file = self.elements_in_file(file);
        if symbol.is_empty() {
            return in_file.into_iter().find(|e| e.kind == ElementKind::Module);
        }
        let suffix = format!(".{symbol}");
        in_file
            .into_iter()
            .filter(|e| e.kind != ElementKind::Module)
            .find(|e| e.name == symbol || e.id.ends_with(&suffix))
    }

    /// Resolve a call to `name` made from `caller`.
    ///
    /// Tries the caller's own module, then the modules its module imports in
    /// declaration order, then any element with that short name. The first
    /// hit wins, so overloaded names may resolve to the wrong definition;
    /// the returned [`Confidence`] says which rule matched.
    #[must_use]
    pub fn resolve(&self, caller: &str, name: &str) -> Option<(&CodeElement, Confidence)> {
        let caller = self.elements.get(caller)?;
        let candidates: Vec<&CodeElement> = self.find_by_name(name);
        if candidates.is_empty() {
            return None;
        }

        if let Some(found) = candidates.iter().find(|c| c.module == caller.module) {
            return Some((*found, Confidence::SameModule));
        }

        let imports = self
            .elements
            .get(&caller.module)
            .map(|m| m.imports.as_slice())
            .unwrap_or_default();
        for import in imports {
            if let Some(found) = candidates
                .iter()
                .find(|c| c.module == *import || c.id == *import)
            {
                return Some((*found, Confidence::ImportedModule));
            }
        }

        candidates
            .first()
            .map(|found| (*found, Confidence::GlobalFallback))
    }

    /// Resolved callees of `id` with edge confidence, in call order
    #[must_use]
    pub fn callees(&self, id: &str) -> Vec<(&CodeElement, Confidence)> {
        self.callees
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|(callee, conf)| self.elements.get(callee).map(|e| (e, *conf)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Elements with a resolved call to `id`
    #[must_use]
    pub fn callers(&self, id: &str) -> Vec<&CodeElement> {
        self.elements
            .get(id)
            .map(|e| {
                e.callers
                    .iter()
                    .filter_map(|caller| self.elements.get(caller))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Confidence of the call edge `from → to`, if any
    #[must_use]
    pub fn edge_confidence(&self, from: &str, to: &str) -> Option<Confidence> {
        self.callees
            .get(from)?
            .iter()
            .find(|(callee, _)| callee == to)
            .map(|(_, conf)| *conf)
    }

    /// Every resolved call edge
    #[must_use]
    pub fn resolved_calls(&self) -> &[ResolvedCall] {
        &self.resolved
    }

    /// Every call name with no definition in the project
    #[must_use]
    pub fn unresolved_calls(&self) -> &[UnresolvedCall] {
        &self.unresolved
    }

    /// Files that were skipped during analysis
    #[must_use]
    pub fn skipped_files(&self) -> &[String] {
        &self.skipped_files
    }

    /// Caller → callee graph
    #[must_use]
    pub fn call_graph(&self) -> &DiGraph<String, Confidence> {
        &self.call_graph
    }

    /// Module → imported module graph
    #[must_use]
    pub fn import_graph(&self) -> &DiGraph<String, ()> {
        &self.import_graph
    }

    /// Union of call and import edges
    #[must_use]
    pub fn dependency_graph(&self) -> &DiGraph<String, DependencyKind> {
        &self.dependency_graph
    }

    /// Groups of modules that import each other
    #[must_use]
    pub fn import_cycles(&self) -> Vec<Vec<String>> {
        petgraph::algo::tarjan_scc(&self.import_graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || scc
                        .first()
                        .is_some_and(|n| self.import_graph.contains_edge(*n, *n))
            })
            .map(|scc| {
                let mut names: Vec<String> =
                    scc.into_iter().map(|n| self.import_graph[n].clone()).collect();
                names.sort();
                names
            })
            .collect()
    }

    /// Summary counts
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            call_edges: self.resolved.len(),
            import_edges: self.import_graph.edge_count(),
            unresolved_calls: self.unresolved.len(),
            low_confidence_edges: self
                .resolved
                .iter()
                .filter(|c| c.confidence.is_low())
                .count(),
            skipped_files: self.skipped_files.len(),
            ..GraphStats::default()
        };
        for element in self.elements.values() {
            match element.kind {
                ElementKind::Module => stats.files += 1,
                ElementKind::Class => stats.classes += 1,
                ElementKind::Function => stats.functions += 1,
                ElementKind::Method => stats.methods += 1,
            }
        }
        stats
    }

    fn insert(&mut self, element: CodeElement) {
        if element.kind != ElementKind::Module {
            self.by_name
                .entry(element.name.clone())
                .or_default()
                .push(element.id.clone());
        }
        self.by_file
            .entry(element.location.file.clone())
            .or_default()
            .push(element.id.clone());
        self.elements.insert(element.id.clone(), element);
    }

    fn link_imports(&mut self) {
        let mut edges = Vec::new();
        for module in self.elements.values().filter(|e| e.kind == ElementKind::Module) {
            for import in &module.imports {
                let target = match self.elements.get(import) {
                    Some(found) if found.kind == ElementKind::Module => Some(found.id.clone()),
                    Some(found) => Some(found.module.clone()),
                    None => None,
                };
                if let Some(target) = target {
                    if target != module.id {
                        edges.push((module.id.clone(), target));
                    }
                }
            }
        }

        for (from, to) in edges {
            let a = node(&mut self.import_graph, &mut self.import_nodes, &from);
            let b = node(&mut self.import_graph, &mut self.import_nodes, &to);
            self.import_graph.update_edge(a, b, ());
            let a = node(&mut self.dependency_graph, &mut self.dependency_nodes, &from);
            let b = node(&mut self.dependency_graph, &mut self.dependency_nodes, &to);
            self.dependency_graph.update_edge(a, b, DependencyKind::Import);
        }
    }

    fn link_calls(&mut self) {
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for element in self.elements.values() {
            if !(element.kind.is_callable() || element.kind == ElementKind::Module) {
                continue;
            }
            for name in &element.calls {
                match self.resolve(&element.id, name) {
                    Some((callee, confidence)) => resolved.push(ResolvedCall {
                        caller: element.id.clone(),
                        callee: callee.id.clone(),
                        name: name.clone(),
                        confidence,
                    }),
                    None => unresolved.push(UnresolvedCall {
                        caller: element.id.clone(),
                        name: name.clone(),
                    }),
                }
            }
        }

        for call in &resolved {
            let edges = self.callees.entry(call.caller.clone()).or_default();
            if !edges.iter().any(|(id, _)| *id == call.callee) {
                edges.push((call.callee.clone(), call.confidence));
            }
            if let Some(callee) = self.elements.get_mut(&call.callee) {
                if !callee.callers.contains(&call.caller) {
                    callee.callers.push(call.caller.clone());
                }
            }

            let a = node(&mut self.call_graph, &mut self.call_nodes, &call.caller);
            let b = node(&mut self.call_graph, &mut self.call_nodes, &call.callee);
            self.call_graph.update_edge(a, b, call.confidence);
            let a = node(&mut self.dependency_graph, &mut self.dependency_nodes, &call.caller);
            let b = node(&mut self.dependency_graph, &mut self.dependency_nodes, &call.callee);
            self.dependency_graph
                .update_edge(a, b, DependencyKind::Call(call.confidence));
        }

        if !unresolved.is_empty() {
            tracing::debug!(count = unresolved.len(), "calls left unresolved");
        }
        self.resolved = resolved;
        self.unresolved = unresolved;
    }
}

fn node<E>(graph: &mut DiGraph<String, E>, index: &mut HashMap<String, NodeIndex>, id: &str) -> NodeIndex {
    *index
        .entry(id.to_string())
        .or_insert_with(|| graph.add_node(id.to_string()))
}
