/*
 * Class extractor.
 *
 * Captures bases (textual expressions), decorators, docstring, methods,
 * class variables, and inner classes. Bases mentioning ABC or Protocol mark
 * the class interface-like.
 */

use super::functions::extract_function;
use super::variables::extract_assignment;
use super::{block_docstring, decorator_names, line_end, line_start, node_text};
use crate::ir::{ClassInfo, VariableScope};
use tree_sitter::Node;

/// Extract a `class_definition` node. Decorators come from the enclosing
/// `decorated_definition`, if any.
pub fn extract_class(node: &Node, source: &str, decorators: Vec<String>) -> Option<ClassInfo> {
    if node.kind() != "class_definition" {
        return None;
    }

    let name = node_text(&node.child_by_field_name("name")?, source);
    let body = node.child_by_field_name("body")?;

    let bases = node
        .child_by_field_name("superclasses")
        .map(|args| extract_bases(&args, source))
        .unwrap_or_default();

    let is_interface_like = bases
        .iter()
        .any(|b| b.contains("ABC") || b.contains("Protocol"));

    let mut methods = Vec::new();
    let mut class_variables = Vec::new();
    let mut inner_classes = Vec::new();

    let mut cursor = body.walk();
    for child in body.children(&mut cursor) {
        match child.kind() {
            "function_definition" => {
                if let Some(f) = extract_function(&child, source, Vec::new(), true) {
                    methods.push(f);
                }
            }
            "class_definition" => {
                if let Some(c) = extract_class(&child, source, Vec::new()) {
                    inner_classes.push(c);
                }
            }
            "decorated_definition" => {
                let decs = decorator_names(&child, source);
                if let Some(def) = child.child_by_field_name("definition") {
                    match def.kind() {
                        "function_definition" => {
                            if let Some(f) = extract_function(&def, source, decs, true) {
                                methods.push(f);
                            }
                        }
                        "class_definition" => {
                            if let Some(c) = extract_class(&def, source, decs) {
                                inner_classes.push(c);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "expression_statement" => {
                if let Some(assign) = child.child(0).filter(|c| c.kind() == "assignment") {
                    if let Some(var) = extract_assignment(&assign, source, VariableScope::Class) {
                        class_variables.push(var);
                    }
                }
            }
            _ => {}
        }
    }

    Some(ClassInfo {
        name,
        bases,
        docstring: block_docstring(&body, source),
        decorators,
        is_interface_like,
        methods,
        class_variables,
        inner_classes,
        line_start: line_start(node),
        line_end: line_end(node),
    })
}

/// Base expressions from the superclass argument list; keyword arguments
/// (`metaclass=...`) are not bases.
fn extract_bases(args: &Node, source: &str) -> Vec<String> {
    let mut bases = Vec::new();
    let mut cursor = args.walk();
    for child in args.children(&mut cursor) {
        match child.kind() {
            "(" | ")" | "," | "keyword_argument" | "comment" => {}
            _ => bases.push(node_text(&child, source)),
        }
    }
    bases
}

#[cfg(test)]
mod tests {
    use super::super::{find_node, parse_python};
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_class(code: &str) -> ClassInfo {
        let tree = parse_python(code);
        let node = find_node(tree.root_node(), "class_definition").unwrap();
        extract_class(&node, code, Vec::new()).unwrap()
    }

    #[test]
    fn test_simple_class() {
        let c = parse_class("class Foo:\n    pass\n");
        assert_eq!(c.name, "Foo");
        assert!(c.bases.is_empty());
        assert!(!c.is_interface_like);
    }

    #[test]
    fn test_bases_and_interface_flag() {
        let c = parse_class("class Store(abc.ABC, Base):\n    pass\n");
        assert_eq!(c.bases, vec!["abc.ABC".to_string(), "Base".to_string()]);
        assert!(c.is_interface_like);

        let p = parse_class("class Reader(Protocol):\n    pass\n");
        assert!(p.is_interface_like);
    }

    #[test]
    fn test_metaclass_kwarg_not_a_base() {
        let c = parse_class("class Foo(Base, metaclass=Meta):\n    pass\n");
        assert_eq!(c.bases, vec!["Base".to_string()]);
    }

    #[test]
    fn test_methods_and_class_variables() {
        let code = "\
class Config:
    \"\"\"Holds settings.\"\"\"

    DEFAULT_TIMEOUT = 30

    def load(self):
        pass

    @staticmethod
    def parse(text):
        pass
";
        let c = parse_class(code);
        assert_eq!(c.docstring, Some("Holds settings.".to_string()));
        assert_eq!(c.class_variables.len(), 1);
        assert!(c.class_variables[0].is_constant);
        assert_eq!(c.class_variables[0].scope, VariableScope::Class);
        assert_eq!(c.methods.len(), 2);
        assert!(c.methods.iter().all(|m| m.is_method));
        assert!(c.methods[1].is_static);
    }

    #[test]
    fn test_inner_class() {
        let code = "\
class Outer:
    class Inner:
        pass
";
        let c = parse_class(code);
        assert_eq!(c.inner_classes.len(), 1);
        assert_eq!(c.inner_classes[0].name, "Inner");
    }

    #[test]
    fn test_decorated_class() {
        let code = "@dataclass\nclass Point:\n    pass\n";
        let tree = parse_python(code);
        let decorated = find_node(tree.root_node(), "decorated_definition").unwrap();
        let decs = decorator_names(&decorated, code);
        let def = decorated.child_by_field_name("definition").unwrap();
        let c = extract_class(&def, code, decs).unwrap();
        assert_eq!(c.decorators, vec!["dataclass".to_string()]);
    }
}
