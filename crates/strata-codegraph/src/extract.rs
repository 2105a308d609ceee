//! Tree-sitter extraction
//!
//! Walks one syntax tree and produces the module element plus every class,
//! function and method it defines. Calls are recorded by short name; they
//! are resolved later against the whole project.

use crate::complexity::node_complexity;
use crate::element::{CodeElement, ElementKind, SourceLocation};
use crate::error::AnalysisError;
use crate::language::Language;
use std::collections::HashSet;
use tree_sitter::{Node, Parser};

/// Everything extracted from one file
#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// The module element (carries the file's imports)
    pub module: CodeElement,
    /// Classes, functions and methods in source order
    pub elements: Vec<CodeElement>,
}

/// Parse `source` and extract its definitions.
///
/// Syntax errors do not fail extraction; tree-sitter recovers and whatever
/// parsed cleanly is kept.
///
/// # Errors
/// Returns [`AnalysisError::Parse`] if the grammar cannot be loaded or the
/// parser yields no tree
pub fn parse_source(
    rel_path: &str,
    source: &str,
    language: Language,
) -> Result<ParsedFile, AnalysisError> {
    let parse_error = |message: String| AnalysisError::Parse {
        path: rel_path.to_string(),
        message,
    };

    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| parse_error(e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| parse_error("parser produced no tree".to_string()))?;
    let root = tree.root_node();
    if root.has_error() {
        tracing::debug!(file = rel_path, "syntax errors present, extracting best-effort");
    }

    let mut extractor = Extractor {
        language,
        file: rel_path,
        module: language.module_name(rel_path),
        source,
        lines: source.lines().collect(),
        elements: Vec::new(),
        imports: Vec::new(),
        seen_ids: HashSet::new(),
        is_package: rel_path.ends_with("__init__.py"),
    };

    let mut module_calls = Vec::new();
    let docstring = match language {
        Language::Python => {
            extractor.walk_python(root, None, &mut module_calls);
            python_docstring(root, source)
        }
        Language::Rust => {
            extractor.walk_rust(root, None);
            rust_inner_doc(&extractor.lines)
        }
    };

    let module = CodeElement {
        id: extractor.module.clone(),
        name: extractor
            .module
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_string(),
        kind: ElementKind::Module,
        language,
        module: extractor.module.clone(),
        parent: None,
        location: SourceLocation {
            file: rel_path.to_string(),
            start_line: 1,
            end_line: extractor.lines.len().max(1),
        },
        source: source.to_string(),
        docstring,
        signature: None,
        parameters: Vec::new(),
        return_annotation: None,
        imports: extractor.imports,
        calls: module_calls,
        callers: Vec::new(),
        complexity: node_complexity(root),
    };

    Ok(ParsedFile {
        module,
        elements: extractor.elements,
    })
}

struct Extractor<'s> {
    language: Language,
    file: &'s str,
    module: String,
    source: &'s str,
    lines: Vec<&'s str>,
    elements: Vec<CodeElement>,
    imports: Vec<String>,
    seen_ids: HashSet<String>,
    is_package: bool,
}

/// Fields that differ between definition kinds
struct Definition {
    name: String,
    kind: ElementKind,
    parent: Option<String>,
    docstring: Option<String>,
    signature: Option<String>,
    parameters: Vec<String>,
    return_annotation: Option<String>,
    calls: Vec<String>,
}

impl Extractor<'_> {
    fn push(&mut self, node: Node<'_>, def: Definition) -> String {
        let prefix = def.parent.as_deref().unwrap_or(&self.module);
        let base = format!("{prefix}.{}", def.name);
        let mut id = base.clone();
        let mut n = 2;
        while !self.seen_ids.insert(id.clone()) {
            id = format!("{base}#{n}");
            n += 1;
        }

        let source = text(node, self.source).to_string();
        self.elements.push(CodeElement {
            id: id.clone(),
            name: def.name,
            kind: def.kind,
            language: self.language,
            module: self.module.clone(),
            parent: def.parent,
            location: SourceLocation {
                file: self.file.to_string(),
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
            },
            complexity: node_complexity(node),
            source,
            docstring: def.docstring,
            signature: def.signature,
            parameters: def.parameters,
            return_annotation: def.return_annotation,
            imports: Vec::new(),
            calls: def.calls,
            callers: Vec::new(),
        });
        id
    }

    fn add_import(&mut self, import: String) {
        if !import.is_empty() && !self.imports.contains(&import) {
            self.imports.push(import);
        }
    }

    /// Text from the start of `node` up to its body, trimmed of `:`/`{`
    fn header(&self, node: Node<'_>) -> Option<String> {
        let end = node
            .child_by_field_name("body")
            .map_or(node.end_byte(), |body| body.start_byte());
        let header = self.source.get(node.start_byte()..end)?;
        let header = header
            .trim()
            .trim_end_matches([':', '{', ';'])
            .trim_end();
        (!header.is_empty()).then(|| header.to_string())
    }

    // Python

    fn walk_python(&mut self, node: Node<'_>, class: Option<&str>, module_calls: &mut Vec<String>) {
        for child in named_children(node) {
            match child.kind() {
                "function_definition" => self.python_function(child, child, class),
                "class_definition" => self.python_class(child, child, class, module_calls),
                "decorated_definition" => {
                    if let Some(def) = child.child_by_field_name("definition") {
                        match def.kind() {
                            "function_definition" => self.python_function(def, child, class),
                            "class_definition" => {
                                self.python_class(def, child, class, module_calls);
                            }
                            _ => {}
                        }
                    }
                }
                "import_statement" | "import_from_statement" => self.python_import(child),
                "if_statement" | "try_statement" | "with_statement" | "block" | "else_clause"
                | "elif_clause" | "except_clause" | "finally_clause" => {
                    self.walk_python(child, class, module_calls);
                }
                _ if class.is_none() => {
                    collect_calls(child, Language::Python, self.source, module_calls);
                }
                _ => {}
            }
        }
    }

    fn python_function(&mut self, def: Node<'_>, outer: Node<'_>, class: Option<&str>) {
        let Some(name) = field_text(def, "name", self.source) else {
            return;
        };
        let parameters = def
            .child_by_field_name("parameters")
            .map(|params| {
                named_children(params)
                    .into_iter()
                    .map(|p| text(p, self.source).to_string())
                    .collect()
            })
            .unwrap_or_default();
        let mut calls = Vec::new();
        if let Some(body) = def.child_by_field_name("body") {
            collect_calls(body, Language::Python, self.source, &mut calls);
        }

        self.push(
            outer,
            Definition {
                name,
                kind: if class.is_some() {
                    ElementKind::Method
                } else {
                    ElementKind::Function
                },
                parent: class.map(str::to_string),
                docstring: python_docstring(def, self.source),
                signature: self.header(def),
                parameters,
                return_annotation: field_text(def, "return_type", self.source),
                calls,
            },
        );
    }

    fn python_class(
        &mut self,
        def: Node<'_>,
        outer: Node<'_>,
        class: Option<&str>,
        module_calls: &mut Vec<String>,
    ) {
        let Some(name) = field_text(def, "name", self.source) else {
            return;
        };
        let id = self.push(
            outer,
            Definition {
                name,
                kind: ElementKind::Class,
                parent: class.map(str::to_string),
                docstring: python_docstring(def, self.source),
                signature: self.header(def),
                parameters: Vec::new(),
                return_annotation: None,
                calls: Vec::new(),
            },
        );
        if let Some(body) = def.child_by_field_name("body") {
            self.walk_python(body, Some(&id), module_calls);
        }
    }

    fn python_import(&mut self, node: Node<'_>) {
        if node.kind() == "import_statement" {
            for child in named_children(node) {
                let target = match child.kind() {
                    "aliased_import" => child.child_by_field_name("name"),
                    _ => Some(child),
                };
                if let Some(target) = target {
                    self.add_import(text(target, self.source).to_string());
                }
            }
            return;
        }

        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let base = self.python_absolute(text(module_node, self.source));
        self.add_import(base.clone());

        let mut cursor = node.walk();
        let names: Vec<_> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let name = match name.kind() {
                "aliased_import" => name.child_by_field_name("name"),
                _ => Some(name),
            };
            if let Some(name) = name {
                let name = text(name, self.source);
                let qualified = if base.is_empty() {
                    name.to_string()
                } else {
                    format!("{base}.{name}")
                };
                self.add_import(qualified);
            }
        }
    }

    /// Resolve a possibly relative (`..pkg.mod`) import against this module
    fn python_absolute(&self, raw: &str) -> String {
        let dots = raw.chars().take_while(|c| *c == '.').count();
        let rest = &raw[dots..];
        if dots == 0 {
            return rest.to_string();
        }

        let mut package: Vec<&str> = self.module.split('.').collect();
        if !self.is_package {
            package.pop();
        }
        for _ in 1..dots {
            package.pop();
        }
        if !rest.is_empty() {
            package.push(rest);
        }
        package.join(".")
    }

    // Rust

    fn walk_rust(&mut self, node: Node<'_>, owner: Option<&str>) {
        for child in named_children(node) {
            match child.kind() {
                "function_item" => self.rust_function(child, owner),
                "function_signature_item" if owner.is_some() => self.rust_function(child, owner),
                "struct_item" | "enum_item" | "union_item" => {
                    self.rust_type(child);
                }
                "trait_item" => {
                    let id = self.rust_type(child);
                    if let (Some(id), Some(body)) = (id, child.child_by_field_name("body")) {
                        self.walk_rust(body, Some(&id));
                    }
                }
                "impl_item" => {
                    let owner_id = child
                        .child_by_field_name("type")
                        .and_then(|ty| rust_type_name(ty, self.source))
                        .map(|name| format!("{}.{name}", self.module));
                    if let (Some(owner_id), Some(body)) =
                        (owner_id, child.child_by_field_name("body"))
                    {
                        self.walk_rust(body, Some(&owner_id));
                    }
                }
                "use_declaration" => self.rust_use(child),
                _ => {}
            }
        }
    }

    fn rust_function(&mut self, node: Node<'_>, owner: Option<&str>) {
        let Some(name) = field_text(node, "name", self.source) else {
            return;
        };
        let parameters = node
            .child_by_field_name("parameters")
            .map(|params| {
                named_children(params)
                    .into_iter()
                    .filter(|p| p.kind() != "attribute_item")
                    .map(|p| text(p, self.source).to_string())
                    .collect()
            })
            .unwrap_or_default();
        let mut calls = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            collect_calls(body, Language::Rust, self.source, &mut calls);
        }

        self.push(
            node,
            Definition {
                name,
                kind: if owner.is_some() {
                    ElementKind::Method
                } else {
                    ElementKind::Function
                },
                parent: owner.map(str::to_string),
                docstring: rust_outer_doc(&self.lines, node.start_position().row),
                signature: self.header(node),
                parameters,
                return_annotation: field_text(node, "return_type", self.source),
                calls,
            },
        );
    }

    fn rust_type(&mut self, node: Node<'_>) -> Option<String> {
        let name = field_text(node, "name", self.source)?;
        let id = self.push(
            node,
            Definition {
                name,
                kind: ElementKind::Class,
                parent: None,
                docstring: rust_outer_doc(&self.lines, node.start_position().row),
                signature: self.header(node),
                parameters: Vec::new(),
                return_annotation: None,
                calls: Vec::new(),
            },
        );
        Some(id)
    }

    fn rust_use(&mut self, node: Node<'_>) {
        let Some(argument) = node.child_by_field_name("argument") else {
            return;
        };
        let mut paths = Vec::new();
        expand_use_tree(argument, &[], self.source, &mut paths);
        for path in paths {
            for candidate in self.rust_module_candidates(&path) {
                self.add_import(candidate);
            }
        }
    }

    /// Dotted names a `use` path may refer to: the path itself and its parent
    fn rust_module_candidates(&self, path: &[String]) -> Vec<String> {
        let mut own: Vec<&str> = if self.module == "crate" {
            Vec::new()
        } else {
            self.module.split('.').collect()
        };

        let mut segments = path.iter().map(String::as_str).peekable();
        let mut resolved: Vec<&str> = match segments.peek().copied() {
            Some("crate") => {
                segments.next();
                Vec::new()
            }
            Some("self") => {
                segments.next();
                own.clone()
            }
            Some("super") => {
                while segments.peek() == Some(&"super") {
                    segments.next();
                    own.pop();
                }
                own
            }
            _ => Vec::new(),
        };
        resolved.extend(segments.filter(|s| *s != "self"));

        let mut out = Vec::new();
        if !resolved.is_empty() {
            out.push(resolved.join("."));
        }
        if resolved.len() > 1 {
            out.push(resolved[..resolved.len() - 1].join("."));
        }
        out
    }
}

fn expand_use_tree(node: Node<'_>, prefix: &[String], source: &str, out: &mut Vec<Vec<String>>) {
    let split = |n: Node<'_>| -> Vec<String> {
        text(n, source)
            .split("::")
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "*")
            .map(str::to_string)
            .collect()
    };
    let joined = |tail: Vec<String>| -> Vec<String> {
        let mut path = prefix.to_vec();
        path.extend(tail);
        path
    };

    match node.kind() {
        "identifier" | "crate" | "self" | "super" | "scoped_identifier" | "use_wildcard" => {
            out.push(joined(split(node)));
        }
        "use_as_clause" => {
            if let Some(path) = node.child_by_field_name("path") {
                expand_use_tree(path, prefix, source, out);
            }
        }
        "scoped_use_list" => {
            let base = node
                .child_by_field_name("path")
                .map_or_else(|| prefix.to_vec(), |p| joined(split(p)));
            if let Some(list) = node.child_by_field_name("list") {
                expand_use_tree(list, &base, source, out);
            }
        }
        "use_list" => {
            for child in named_children(node) {
                expand_use_tree(child, prefix, source, out);
            }
        }
        _ => {}
    }
}

fn rust_type_name(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "type_identifier" => Some(text(node, source).to_string()),
        "generic_type" | "reference_type" => {
            rust_type_name(node.child_by_field_name("type")?, source)
        }
        "scoped_type_identifier" => field_text(node, "name", source),
        _ => None,
    }
}

/// Append the short names of every call under `node`, first-seen order
fn collect_calls(node: Node<'_>, language: Language, source: &str, out: &mut Vec<String>) {
    let call_kind = match language {
        Language::Python => "call",
        Language::Rust => "call_expression",
    };

    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == call_kind {
            let name = current
                .child_by_field_name("function")
                .and_then(|f| callee_name(f, source));
            if let Some(name) = name {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        let mut children = named_children(current);
        children.reverse();
        stack.extend(children);
    }
}

fn callee_name(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(text(node, source).to_string()),
        "attribute" => field_text(node, "attribute", source),
        "scoped_identifier" => field_text(node, "name", source),
        "field_expression" => field_text(node, "field", source),
        "generic_function" => callee_name(node.child_by_field_name("function")?, source),
        _ => None,
    }
}

fn python_docstring(node: Node<'_>, source: &str) -> Option<String> {
    let body = if node.kind() == "module" {
        node
    } else {
        node.child_by_field_name("body")?
    };
    let first = named_children(body).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = named_children(first).into_iter().next()?;
    (string.kind() == "string").then(|| clean_docstring(text(string, source)))
}

fn clean_docstring(raw: &str) -> String {
    let raw = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| raw.strip_prefix(*q).and_then(|r| r.strip_suffix(*q)))
        .unwrap_or(raw);
    inner
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// `///` lines directly above `row` (0-based), skipping attributes
fn rust_outer_doc(lines: &[&str], row: usize) -> Option<String> {
    let mut doc = Vec::new();
    for line in lines[..row.min(lines.len())].iter().rev() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("///") {
            doc.push(rest.trim());
        } else if trimmed.starts_with("#[") {
            continue;
        } else {
            break;
        }
    }
    if doc.is_empty() {
        return None;
    }
    doc.reverse();
    Some(doc.join("\n").trim().to_string())
}

/// Leading `//!` lines of a file
fn rust_inner_doc(lines: &[&str]) -> Option<String> {
    let doc: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .take_while(|l| l.starts_with("//!"))
        .map(|l| l.trim_start_matches("//!").trim())
        .collect();
    (!doc.is_empty()).then(|| doc.join("\n").trim().to_string())
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    let child = node.child_by_field_name(field)?;
    let value = text(child, source);
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(parsed: &ParsedFile) -> Vec<&str> {
        parsed.elements.iter().map(|e| e.id.as_str()).collect()
    }

    const PYTHON: &str = r#""""User management."""
import os
from .storage import save_record, load as load_record
from . import audit

class User:
    """A registered user."""

    def __init__(self, name):
        self.name = name

    @property
    def display(self) -> str:
        return format_name(self.name)

    def save(self):
        if self.name and os.path.exists("x"):
            save_record(self)
        audit.log("saved")

def format_name(name: str) -> str:
    """Title-case a name."""
    return name.title()

main()
"#;

    #[test]
    fn python_definitions_and_ids() {
        let parsed = parse_source("app/users.py", PYTHON, Language::Python).unwrap();
        assert_eq!(parsed.module.id, "app.users");
        assert_eq!(parsed.module.docstring.as_deref(), Some("User management."));
        assert_eq!(
            ids(&parsed),
            vec![
                "app.users.User",
                "app.users.User.__init__",
                "app.users.User.display",
                "app.users.User.save",
                "app.users.format_name",
            ]
        );

        let display = &parsed.elements[2];
        assert_eq!(display.kind, ElementKind::Method);
        assert_eq!(display.parent.as_deref(), Some("app.users.User"));
        assert_eq!(display.return_annotation.as_deref(), Some("str"));
        assert_eq!(display.calls, vec!["format_name"]);

        let func = &parsed.elements[4];
        assert_eq!(func.kind, ElementKind::Function);
        assert_eq!(func.docstring.as_deref(), Some("Title-case a name."));
        assert_eq!(func.signature.as_deref(), Some("def format_name(name: str) -> str"));
        assert_eq!(func.parameters, vec!["name: str"]);
    }

    #[test]
    fn python_imports_resolve_relative_paths() {
        let parsed = parse_source("app/users.py", PYTHON, Language::Python).unwrap();
        assert_eq!(
            parsed.module.imports,
            vec![
                "os",
                "app.storage",
                "app.storage.save_record",
                "app.storage.load",
                "app",
                "app.audit",
            ]
        );
        assert_eq!(parsed.module.calls, vec!["main"]);
    }

    #[test]
    fn python_calls_and_complexity() {
        let parsed = parse_source("app/users.py", PYTHON, Language::Python).unwrap();
        let save = &parsed.elements[3];
        assert_eq!(save.calls, vec!["exists", "save_record", "log"]);
        // if + and
        assert_eq!(save.complexity, 3);
    }

    #[test]
    fn documented_function_complexity_ignores_prose() {
        let src = r#"
def pick(x):
    """Use x if set, or the default for each caller while idle."""
    label = "if and or"  # while for
    return x
"#;
        let parsed = parse_source("pick.py", src, Language::Python).unwrap();
        assert_eq!(parsed.elements[0].complexity, 1);
        assert_eq!(parsed.module.complexity, 1);
    }

    const RUST: &str = r"//! Graph storage

use crate::edge::{Edge, Weight};
use super::util::*;

/// A node store
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<u32>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add(&mut self, n: u32) -> usize {
        if n > 0 && self.nodes.len() < 10 {
            self.nodes.push(n);
        }
        checked_len(&self.nodes)
    }
}

pub trait Visit {
    fn visit(&self, n: u32);
}

fn checked_len(v: &[u32]) -> usize {
    Edge::count(v.len())
}
";

    #[test]
    fn rust_definitions() {
        let parsed = parse_source("src/graph/store.rs", RUST, Language::Rust).unwrap();
        assert_eq!(parsed.module.id, "graph.store");
        assert_eq!(parsed.module.docstring.as_deref(), Some("Graph storage"));
        assert_eq!(
            ids(&parsed),
            vec![
                "graph.store.Graph",
                "graph.store.Graph.new",
                "graph.store.Graph.add",
                "graph.store.Visit",
                "graph.store.Visit.visit",
                "graph.store.checked_len",
            ]
        );

        let graph = &parsed.elements[0];
        assert_eq!(graph.kind, ElementKind::Class);
        assert_eq!(graph.docstring.as_deref(), Some("A node store"));

        let new = &parsed.elements[1];
        assert_eq!(new.kind, ElementKind::Method);
        assert_eq!(new.docstring.as_deref(), Some("Create an empty graph"));
        assert_eq!(new.signature.as_deref(), Some("pub fn new() -> Self"));

        let add = &parsed.elements[2];
        assert_eq!(add.parameters, vec!["&mut self", "n: u32"]);
        assert_eq!(add.calls, vec!["len", "push", "checked_len"]);
        assert_eq!(add.complexity, 3);

        assert_eq!(parsed.elements[5].calls, vec!["count", "len"]);
    }

    #[test]
    fn rust_use_paths_become_module_imports() {
        let parsed = parse_source("src/graph/store.rs", RUST, Language::Rust).unwrap();
        assert_eq!(
            parsed.module.imports,
            vec!["edge.Edge", "edge", "edge.Weight", "graph.util", "graph"]
        );
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let src = "def f():\n    pass\n\ndef f():\n    pass\n";
        let parsed = parse_source("m.py", src, Language::Python).unwrap();
        assert_eq!(ids(&parsed), vec!["m.f", "m.f#2"]);
    }

    #[test]
    fn broken_source_still_yields_clean_parts() {
        let src = "def ok():\n    return 1\n\ndef broken(:\n";
        let parsed = parse_source("m.py", src, Language::Python).unwrap();
        assert!(parsed.elements.iter().any(|e| e.id == "m.ok"));
    }
}
