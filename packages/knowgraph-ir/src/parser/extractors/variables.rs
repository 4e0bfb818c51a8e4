/*
 * Assignment extractor.
 *
 * Captures simple-name assignments at module, class, and function scope.
 * Tuple-unpacking targets are skipped; one IR entry describes one bound name.
 */

use super::{line_end, line_start, node_text};
use crate::ir::{VariableInfo, VariableScope};
use tree_sitter::Node;

const VALUE_REPR_MAX_CHARS: usize = 120;

/// Extract an `assignment` node into a [`VariableInfo`]. Returns `None` when
/// the left-hand side is not a plain identifier.
pub fn extract_assignment(
    node: &Node,
    source: &str,
    scope: VariableScope,
) -> Option<VariableInfo> {
    if node.kind() != "assignment" {
        return None;
    }

    let left = node.child_by_field_name("left")?;
    if left.kind() != "identifier" {
        return None;
    }
    let name = node_text(&left, source);

    let annotation = node
        .child_by_field_name("type")
        .map(|t| node_text(&t, source));
    let right = node.child_by_field_name("right");

    let inferred_type = annotation.or_else(|| right.as_ref().and_then(infer_literal_type));
    let value_repr = right.map(|r| truncate_chars(&node_text(&r, source), VALUE_REPR_MAX_CHARS));

    Some(VariableInfo {
        is_constant: is_constant_name(&name),
        name,
        inferred_type,
        value_repr,
        scope,
        line_start: line_start(node),
        line_end: line_end(node),
    })
}

/// ALL_UPPERCASE names (underscores and digits allowed) are constants.
pub fn is_constant_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit())
}

fn infer_literal_type(node: &Node) -> Option<String> {
    let ty = match node.kind() {
        "string" | "concatenated_string" => "str",
        "integer" => "int",
        "float" => "float",
        "true" | "false" => "bool",
        "none" => "None",
        "list" | "list_comprehension" => "list",
        "dictionary" | "dictionary_comprehension" => "dict",
        "set" | "set_comprehension" => "set",
        "tuple" => "tuple",
        _ => return None,
    };
    Some(ty.to_string())
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{find_node, parse_python};
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_var(code: &str) -> VariableInfo {
        let tree = parse_python(code);
        let node = find_node(tree.root_node(), "assignment").unwrap();
        extract_assignment(&node, code, VariableScope::Module).unwrap()
    }

    #[test]
    fn test_simple_assignment() {
        let v = parse_var("x = 1\n");
        assert_eq!(v.name, "x");
        assert_eq!(v.inferred_type, Some("int".to_string()));
        assert_eq!(v.value_repr, Some("1".to_string()));
        assert!(!v.is_constant);
        assert_eq!(v.scope, VariableScope::Module);
    }

    #[test]
    fn test_constant_detection() {
        assert!(parse_var("MAX_RETRIES = 5\n").is_constant);
        assert!(parse_var("TIMEOUT_30S = 30\n").is_constant);
        assert!(!parse_var("maxRetries = 5\n").is_constant);
        assert!(!parse_var("_private = 1\n").is_constant);
    }

    #[test]
    fn test_annotation_beats_literal_inference() {
        let v = parse_var("count: float = 0\n");
        assert_eq!(v.inferred_type, Some("float".to_string()));
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(parse_var("s = 'hi'\n").inferred_type, Some("str".into()));
        assert_eq!(parse_var("d = {}\n").inferred_type, Some("dict".into()));
        assert_eq!(parse_var("l = []\n").inferred_type, Some("list".into()));
        assert_eq!(parse_var("b = True\n").inferred_type, Some("bool".into()));
        assert_eq!(parse_var("n = None\n").inferred_type, Some("None".into()));
        assert_eq!(parse_var("c = compute()\n").inferred_type, None);
    }

    #[test]
    fn test_tuple_target_skipped() {
        let code = "a, b = 1, 2\n";
        let tree = parse_python(code);
        let node = find_node(tree.root_node(), "assignment").unwrap();
        assert!(extract_assignment(&node, code, VariableScope::Module).is_none());
    }

    #[test]
    fn test_value_repr_truncated() {
        let long = format!("x = '{}'\n", "a".repeat(500));
        let v = parse_var(&long);
        assert_eq!(v.value_repr.unwrap().chars().count(), 120);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_screaming_snake_is_constant(name in "[A-Z][A-Z0-9_]{0,16}") {
                prop_assert!(is_constant_name(&name));
            }

            #[test]
            fn prop_lowercase_start_never_constant(name in "[a-z][A-Za-z0-9_]{0,16}") {
                prop_assert!(!is_constant_name(&name));
            }
        }
    }
}
