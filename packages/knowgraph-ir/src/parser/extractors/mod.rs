/*
 * Per-construct extractors over the tree-sitter Python AST.
 *
 * Each submodule turns one grammar construct into its IR counterpart:
 * - imports:   import / from-import statements
 * - functions: function_definition (+ parameters, signature, complexity)
 * - classes:   class_definition (+ methods, class variables, inner classes)
 * - variables: assignment statements
 */

pub mod classes;
pub mod functions;
pub mod imports;
pub mod variables;

use tree_sitter::Node;

/// Source text covered by a node.
pub(crate) fn node_text(node: &Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

pub(crate) fn line_start(node: &Node) -> u32 {
    node.start_position().row as u32 + 1
}

pub(crate) fn line_end(node: &Node) -> u32 {
    node.end_position().row as u32 + 1
}

/// Strip the quote syntax from a string literal, including prefixes
/// (`r"..."`, `f'''...'''`) and triple quotes.
pub(crate) fn clean_string_literal(raw: &str) -> String {
    let without_prefix = raw.trim_start_matches(|c: char| {
        matches!(c, 'r' | 'R' | 'b' | 'B' | 'u' | 'U' | 'f' | 'F')
    });
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if without_prefix.starts_with(quote) && without_prefix.len() >= 2 * quote.len() {
            if let Some(stripped) = without_prefix
                .strip_prefix(quote)
                .and_then(|s| s.strip_suffix(quote))
            {
                return stripped.trim().to_string();
            }
        }
    }
    without_prefix.trim().to_string()
}

/// First string-literal statement of a block, if any.
pub(crate) fn block_docstring(block: &Node, source: &str) -> Option<String> {
    let mut cursor = block.walk();
    for stmt in block.children(&mut cursor) {
        match stmt.kind() {
            "comment" => continue,
            "expression_statement" => {
                let first = stmt.child(0)?;
                if first.kind() == "string" {
                    return Some(clean_string_literal(&node_text(&first, source)));
                }
                return None;
            }
            _ => return None,
        }
    }
    None
}

/// Decorator names for a `decorated_definition`, dotted forms preserved and
/// call arguments stripped (`@app.route("/x")` → `app.route`).
pub(crate) fn decorator_names(decorated: &Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = decorated.walk();
    for child in decorated.children(&mut cursor) {
        if child.kind() == "decorator" {
            let text = node_text(&child, source);
            let text = text.trim_start_matches('@').trim();
            let name = text.split('(').next().unwrap_or(text).trim();
            names.push(name.to_string());
        }
    }
    names
}

#[cfg(test)]
pub(crate) fn parse_python(code: &str) -> tree_sitter::Tree {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::language())
        .unwrap();
    parser.parse(code, None).unwrap()
}

#[cfg(test)]
pub(crate) fn find_node<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    if node.kind() == kind {
        return Some(node);
    }
    for i in 0..node.child_count() {
        if let Some(found) = node.child(i).and_then(|c| find_node(c, kind)) {
            return Some(found);
        }
    }
    None
}
