/*
 * Import statement extractor.
 *
 * Handles the full Python import syntax:
 * - import module / import module as alias / import a, b
 * - from module import name [as alias], ...
 * - from module import *
 * - from .pkg import name (any relative level)
 */

use super::{line_end, line_start, node_text};
use crate::ir::ImportInfo;
use tree_sitter::Node;

/// Extract bindings from an `import_statement` node. `import a, b` yields
/// one entry per module.
pub fn extract_import_statement(node: &Node, source: &str) -> Vec<ImportInfo> {
    if node.kind() != "import_statement" {
        return Vec::new();
    }

    let mut imports = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "dotted_name" => imports.push(ImportInfo {
                name: node_text(&child, source),
                from_module: None,
                alias: None,
                is_star: false,
                is_relative: false,
                relative_level: 0,
                line_start: line_start(node),
                line_end: line_end(node),
            }),
            "aliased_import" => {
                if let Some((name, alias)) = aliased_parts(&child, source) {
                    imports.push(ImportInfo {
                        name,
                        from_module: None,
                        alias: Some(alias),
                        is_star: false,
                        is_relative: false,
                        relative_level: 0,
                        line_start: line_start(node),
                        line_end: line_end(node),
                    });
                }
            }
            _ => {}
        }
    }
    imports
}

/// Extract bindings from an `import_from_statement` node, one entry per
/// imported name.
pub fn extract_import_from_statement(node: &Node, source: &str) -> Vec<ImportInfo> {
    if node.kind() != "import_from_statement" {
        return Vec::new();
    }

    let mut from_module = String::new();
    let mut relative_level = 0u32;
    let mut names: Vec<(String, Option<String>)> = Vec::new();
    let mut is_star = false;
    let mut seen_import_kw = false;

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import" => seen_import_kw = true,
            "relative_import" => {
                // import_prefix (the leading dots) + optional dotted_name
                let mut inner = child.walk();
                for part in child.children(&mut inner) {
                    match part.kind() {
                        "import_prefix" => {
                            relative_level =
                                node_text(&part, source).matches('.').count() as u32;
                        }
                        "dotted_name" => from_module = node_text(&part, source),
                        _ => {}
                    }
                }
            }
            "dotted_name" => {
                if seen_import_kw {
                    names.push((node_text(&child, source), None));
                } else {
                    from_module = node_text(&child, source);
                }
            }
            "wildcard_import" => {
                is_star = true;
                names.push(("*".to_string(), None));
            }
            "aliased_import" => {
                if let Some((name, alias)) = aliased_parts(&child, source) {
                    names.push((name, Some(alias)));
                }
            }
            _ => {}
        }
    }

    let is_relative = relative_level > 0;
    if from_module.is_empty() && is_relative {
        from_module = ".".repeat(relative_level as usize);
    }

    names
        .into_iter()
        .map(|(name, alias)| ImportInfo {
            name,
            from_module: Some(from_module.clone()),
            alias,
            is_star,
            is_relative,
            relative_level,
            line_start: line_start(node),
            line_end: line_end(node),
        })
        .collect()
}

fn aliased_parts(node: &Node, source: &str) -> Option<(String, String)> {
    let name = node.child_by_field_name("name")?;
    let alias = node.child_by_field_name("alias")?;
    Some((node_text(&name, source), node_text(&alias, source)))
}
