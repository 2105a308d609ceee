//! Context extraction around one element
//!
//! Collects callers and callees up to a hop limit plus the classes they
//! touch. The result is an owned snapshot; it does not borrow the graph.

use crate::element::{CodeElement, ElementKind};
use crate::graph::{CodeGraph, Confidence};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;

/// Summary of a related element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    /// Element id
    pub id: String,
    /// Element kind
    pub kind: ElementKind,
    /// Defining file
    pub file: String,
    /// Declaration
    pub signature: Option<String>,
    /// Documentation
    pub docstring: Option<String>,
    /// Hops from the focus element
    pub depth: usize,
    /// Confidence of the edge that reached this element
    pub confidence: Option<Confidence>,
}

impl ContextEntry {
    fn new(element: &CodeElement, depth: usize, confidence: Option<Confidence>) -> Self {
        Self {
            id: element.id.clone(),
            kind: element.kind,
            file: element.location.file.clone(),
            signature: element.signature.clone(),
            docstring: element.docstring.clone(),
            depth,
            confidence,
        }
    }
}

/// Context snapshot for one element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementContext {
    /// The element itself
    pub focus: ContextEntry,
    /// Its source text
    pub source: String,
    /// Elements that call into the focus, nearest first
    pub callers: Vec<ContextEntry>,
    /// Elements the focus calls into, nearest first
    pub callees: Vec<ContextEntry>,
    /// Classes the focus belongs to or reaches
    pub classes: Vec<ContextEntry>,
}

impl ElementContext {
    /// Plain-text rendering for prompts
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {} ({})", self.focus.id, self.focus.file);
        push_details(&mut out, &self.focus);
        let _ = writeln!(out, "\n```\n{}\n```", self.source.trim_end());

        for (title, entries) in [
            ("Callers", &self.callers),
            ("Callees", &self.callees),
            ("Classes", &self.classes),
        ] {
            if entries.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n## {title}");
            for entry in entries {
                let low = if entry.confidence.is_some_and(|c| c.is_low()) {
                    " (name match only)"
                } else {
                    ""
                };
                let _ = writeln!(out, "- {} [depth {}]{low}", entry.id, entry.depth);
                push_details(&mut out, entry);
            }
        }
        out
    }
}

fn push_details(out: &mut String, entry: &ContextEntry) {
    if let Some(sig) = &entry.signature {
        let _ = writeln!(out, "  {sig}");
    }
    if let Some(first) = entry.docstring.as_deref().and_then(|d| d.lines().next()) {
        let _ = writeln!(out, "  {first}");
    }
}

impl CodeGraph {
    /// Callers and callees of `id` within `max_depth` hops plus referenced
    /// classes; `None` if `id` is unknown
    #[must_use]
    pub fn context_for(&self, id: &str, max_depth: usize) -> Option<ElementContext> {
        let focus = self.element(id)?;

        let callees = self.walk(id, max_depth, |current| {
            self.callees(current)
                .into_iter()
                .map(|(e, conf)| (e, Some(conf)))
                .collect()
        });
        let callers = self.walk(id, max_depth, |current| {
            self.callers(current)
                .into_iter()
                .map(|e| (e, self.edge_confidence(&e.id, current)))
                .collect()
        });

        let mut seen = HashSet::from([focus.id.as_str()]);
        let mut classes = Vec::new();
        let mut consider = |candidate: Option<&str>, depth: usize| {
            let Some(element) = candidate.and_then(|c| self.element(c)) else {
                return;
            };
            if element.kind == ElementKind::Class && seen.insert(element.id.as_str()) {
                classes.push(ContextEntry::new(element, depth, None));
            }
        };
        consider(focus.parent.as_deref(), 0);
        for entry in callees.iter().chain(callers.iter()) {
            consider(Some(entry.id.as_str()), entry.depth);
            let parent = self.element(&entry.id).and_then(|e| e.parent.as_deref());
            consider(parent, entry.depth);
        }

        Some(ElementContext {
            focus: ContextEntry::new(focus, 0, None),
            source: focus.source.clone(),
            callers,
            callees,
            classes,
        })
    }

    /// Breadth-first walk from `start`, skipping the start itself
    fn walk<'g, F>(&'g self, start: &str, max_depth: usize, next: F) -> Vec<ContextEntry>
    where
        F: Fn(&str) -> Vec<(&'g CodeElement, Option<Confidence>)>,
    {
        let mut visited = HashSet::from([start.to_string()]);
        let mut queue = VecDeque::from([(start.to_string(), 0usize)]);
        let mut out = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for (element, confidence) in next(&current) {
                if visited.insert(element.id.clone()) {
                    out.push(ContextEntry::new(element, depth + 1, confidence));
                    queue.push_back((element.id.clone(), depth + 1));
                }
            }
        }
        out
    }
}
