//! Cyclomatic complexity estimate
//!
//! One plus the number of decision nodes in the syntax tree: conditionals
//! (`if`, `elif`, `else if`, conditional expressions), loops, exception
//! handlers, `match`/`case` arms, comprehension clauses and each `and`/`or`
//! or `&&`/`||` operator. Strings, docstrings and comments never count.

use crate::language::Language;
use tree_sitter::{Node, Parser};

/// Estimate the cyclomatic complexity of a source fragment
///
/// A fragment the grammar cannot be loaded for scores 1.
#[must_use]
pub fn cyclomatic_complexity(source: &str, language: Language) -> u32 {
    let mut parser = Parser::new();
    if parser.set_language(&language.grammar()).is_err() {
        return 1;
    }
    parser
        .parse(source, None)
        .map_or(1, |tree| node_complexity(tree.root_node()))
}

/// Complexity of the subtree rooted at `node`
#[must_use]
pub fn node_complexity(node: Node<'_>) -> u32 {
    let mut decisions = 0u32;
    let mut cursor = node.walk();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if is_decision(current) {
            decisions += 1;
        }
        stack.extend(current.named_children(&mut cursor));
    }
    decisions + 1
}

fn is_decision(node: Node<'_>) -> bool {
    match node.kind() {
        // python
        "if_statement" | "elif_clause" | "for_statement" | "while_statement" | "except_clause"
        | "except_group_clause" | "case_clause" | "boolean_operator" | "conditional_expression"
        | "for_in_clause" | "if_clause" => true,
        // rust
        "if_expression" | "for_expression" | "while_expression" | "match_arm" => true,
        "binary_expression" => node
            .child_by_field_name("operator")
            .is_some_and(|op| matches!(op.kind(), "&&" | "||")),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python(src: &str) -> u32 {
        cyclomatic_complexity(src, Language::Python)
    }

    fn rust(src: &str) -> u32 {
        cyclomatic_complexity(src, Language::Rust)
    }

    #[test]
    fn straight_line_code_is_one() {
        assert_eq!(python("def f():\n    return 1\n"), 1);
        assert_eq!(python(""), 1);
        assert_eq!(rust(""), 1);
    }

    #[test]
    fn python_branches() {
        let src = "\
def f(x):
    if x > 0 and x < 10:
        return 1
    elif x == 0 or x is None:
        return 0
    for i in range(x):
        while i:
            i -= 1
    try:
        pass
    except ValueError:
        pass
";
        // if, and, elif, or, for, while, except
        assert_eq!(python(src), 8);
    }

    #[test]
    fn strings_docstrings_and_comments_do_not_count() {
        let src = r#"
def f(x):
    """Return x if it is set or fall back, for callers."""
    msg = "while and or"  # if for
    return x
"#;
        assert_eq!(python(src), 1);
    }

    #[test]
    fn python_expressions_and_comprehensions() {
        let src = "def f(xs):\n    return [x for x in xs if x] if xs else []\n";
        // for, if clause, conditional expression
        assert_eq!(python(src), 4);
    }

    #[test]
    fn rust_operators_and_comments() {
        let src = "\
fn f(a: bool, b: bool) -> bool {
    // if this were a branch it would count
    if a && b || !a {
        return true;
    }
    false
}
";
        assert_eq!(rust(src), 4);
    }

    #[test]
    fn rust_else_if_and_match_arms() {
        let src = r#"
fn g(n: u32) -> &'static str {
    let _ = "if && ||";
    if n == 0 {
        "zero"
    } else if n < 10 {
        "small"
    } else {
        match n % 2 {
            0 => "even",
            _ => "odd",
        }
    }
}
"#;
        // if, else if, two arms
        assert_eq!(rust(src), 5);
    }

    #[test]
    fn identifiers_containing_keywords_do_not_count() {
        assert_eq!(python("format = information\nforce = 1\n"), 1);
    }
}
