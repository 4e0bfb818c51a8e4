/*
 * Function / method extractor.
 *
 * Captures the full header text, parameter kinds and annotations, decorator
 * flags, async flag, cyclomatic complexity, local variables, and nested
 * functions.
 */

use super::variables::extract_assignment;
use super::{block_docstring, line_end, line_start, node_text};
use crate::ir::{FunctionInfo, ParameterInfo, ParameterKind, VariableScope};
use tree_sitter::Node;

/// Extract a `function_definition` node. Decorators come from the enclosing
/// `decorated_definition`, if any.
pub fn extract_function(
    node: &Node,
    source: &str,
    decorators: Vec<String>,
    is_method: bool,
) -> Option<FunctionInfo> {
    if node.kind() != "function_definition" {
        return None;
    }

    let name = node_text(&node.child_by_field_name("name")?, source);
    let body = node.child_by_field_name("body")?;

    let signature = source[node.start_byte()..body.start_byte()]
        .trim_end()
        .trim_end_matches(':')
        .trim_end()
        .to_string();

    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| extract_parameters(&p, source))
        .unwrap_or_default();

    let return_type = node
        .child_by_field_name("return_type")
        .map(|t| node_text(&t, source));

    let is_async = node
        .child(0)
        .map(|c| c.kind() == "async")
        .unwrap_or(false);

    let is_static = decorators.iter().any(|d| d == "staticmethod");
    let is_class_method = decorators.iter().any(|d| d == "classmethod");

    let mut local_variables = Vec::new();
    let mut nested_functions = Vec::new();
    collect_body(&body, source, &mut local_variables, &mut nested_functions);

    Some(FunctionInfo {
        name,
        signature,
        parameters,
        return_type,
        decorators,
        docstring: block_docstring(&body, source),
        is_method,
        is_static,
        is_class_method,
        is_async,
        complexity: cyclomatic_complexity(&body),
        line_start: line_start(node),
        line_end: line_end(node),
        local_variables,
        nested_functions,
    })
}

fn extract_parameters(params: &Node, source: &str) -> Vec<ParameterInfo> {
    let mut out = Vec::new();
    let mut keyword_only = false;

    let mut cursor = params.walk();
    for child in params.children(&mut cursor) {
        let kind = child.kind();
        match kind {
            "keyword_separator" => {
                keyword_only = true;
                continue;
            }
            "(" | ")" | "," | "positional_separator" => continue,
            _ => {}
        }

        let position = out.len();
        let param = match kind {
            "identifier" => Some(ParameterInfo {
                name: node_text(&child, source),
                position,
                kind: positional_or_kw(keyword_only),
                annotation: None,
                default: None,
            }),
            "typed_parameter" => {
                let annotation = child
                    .child_by_field_name("type")
                    .map(|t| node_text(&t, source));
                splat_kind(&child, source).map(|(name, splat)| ParameterInfo {
                    name,
                    position,
                    kind: splat.unwrap_or(positional_or_kw(keyword_only)),
                    annotation,
                    default: None,
                })
            }
            "default_parameter" | "typed_default_parameter" => child
                .child_by_field_name("name")
                .map(|n| ParameterInfo {
                    name: node_text(&n, source),
                    position,
                    kind: positional_or_kw(keyword_only),
                    annotation: child
                        .child_by_field_name("type")
                        .map(|t| node_text(&t, source)),
                    default: child
                        .child_by_field_name("value")
                        .map(|v| node_text(&v, source)),
                }),
            "list_splat_pattern" => {
                keyword_only = true;
                first_identifier(&child, source).map(|name| ParameterInfo {
                    name,
                    position,
                    kind: ParameterKind::Vararg,
                    annotation: None,
                    default: None,
                })
            }
            "dictionary_splat_pattern" => {
                first_identifier(&child, source).map(|name| ParameterInfo {
                    name,
                    position,
                    kind: ParameterKind::Kwarg,
                    annotation: None,
                    default: None,
                })
            }
            _ => None,
        };

        if let Some(param) = param {
            out.push(param);
        }
    }
    out
}

fn positional_or_kw(keyword_only: bool) -> ParameterKind {
    if keyword_only {
        ParameterKind::KeywordOnly
    } else {
        ParameterKind::Positional
    }
}

/// For a typed_parameter, the declared name plus the splat kind when the
/// inner pattern is `*args` / `**kwargs`.
fn splat_kind(node: &Node, source: &str) -> Option<(String, Option<ParameterKind>)> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "identifier" => return Some((node_text(&child, source), None)),
            "list_splat_pattern" => {
                return first_identifier(&child, source).map(|n| (n, Some(ParameterKind::Vararg)))
            }
            "dictionary_splat_pattern" => {
                return first_identifier(&child, source).map(|n| (n, Some(ParameterKind::Kwarg)))
            }
            _ => {}
        }
    }
    None
}

fn first_identifier(node: &Node, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "identifier" {
            return Some(node_text(&child, source));
        }
    }
    None
}

/// Collect local assignments and nested function definitions from a function
/// body, without descending into nested definitions.
fn collect_body(
    block: &Node,
    source: &str,
    locals: &mut Vec<crate::ir::VariableInfo>,
    nested: &mut Vec<FunctionInfo>,
) {
    let mut cursor = block.walk();
    for child in block.children(&mut cursor) {
        visit_for_body(&child, source, locals, nested);
    }
}

fn visit_for_body(
    node: &Node,
    source: &str,
    locals: &mut Vec<crate::ir::VariableInfo>,
    nested: &mut Vec<FunctionInfo>,
) {
    match node.kind() {
        "function_definition" => {
            if let Some(f) = extract_function(node, source, Vec::new(), false) {
                nested.push(f);
            }
        }
        "decorated_definition" => {
            let decorators = super::decorator_names(node, source);
            if let Some(def) = node.child_by_field_name("definition") {
                if def.kind() == "function_definition" {
                    if let Some(f) = extract_function(&def, source, decorators, false) {
                        nested.push(f);
                    }
                }
            }
        }
        "class_definition" => {}
        "assignment" => {
            if let Some(var) = extract_assignment(node, source, VariableScope::Function) {
                locals.push(var);
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                visit_for_body(&child, source, locals, nested);
            }
        }
    }
}

/// 1 + branching statements: if/elif, for, while, except handlers, with,
/// assert, and each boolean-operator operand beyond the first.
pub fn cyclomatic_complexity(body: &Node) -> u32 {
    1 + count_branches(body)
}

fn count_branches(node: &Node) -> u32 {
    let mut count = 0;
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        // Nested definitions carry their own complexity.
        if matches!(child.kind(), "function_definition" | "class_definition") {
            continue;
        }
        count += match child.kind() {
            "if_statement" | "elif_clause" | "for_statement" | "while_statement"
            | "except_clause" | "with_statement" | "assert_statement" | "boolean_operator" => 1,
            _ => 0,
        };
        count += count_branches(&child);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::super::{find_node, parse_python};
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_function(code: &str) -> FunctionInfo {
        let tree = parse_python(code);
        let node = find_node(tree.root_node(), "function_definition").unwrap();
        extract_function(&node, code, Vec::new(), false).unwrap()
    }

    #[test]
    fn test_simple_function() {
        let f = parse_function("def hello():\n    pass\n");
        assert_eq!(f.name, "hello");
        assert_eq!(f.signature, "def hello()");
        assert_eq!(f.complexity, 1);
        assert!(!f.is_async);
    }

    #[test]
    fn test_signature_with_annotations() {
        let f = parse_function("def add(x: int, y: int = 0) -> int:\n    return x + y\n");
        assert_eq!(f.signature, "def add(x: int, y: int = 0) -> int");
        assert_eq!(f.return_type, Some("int".to_string()));
        assert_eq!(f.parameters.len(), 2);
        assert_eq!(f.parameters[0].annotation, Some("int".to_string()));
        assert_eq!(f.parameters[1].default, Some("0".to_string()));
    }

    #[test]
    fn test_parameter_kinds() {
        let f = parse_function("def f(a, *args, b, **kwargs):\n    pass\n");
        let kinds: Vec<ParameterKind> = f.parameters.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParameterKind::Positional,
                ParameterKind::Vararg,
                ParameterKind::KeywordOnly,
                ParameterKind::Kwarg,
            ]
        );
    }

    #[test]
    fn test_keyword_only_after_bare_star() {
        let f = parse_function("def f(a, *, b):\n    pass\n");
        assert_eq!(f.parameters[1].kind, ParameterKind::KeywordOnly);
        assert_eq!(f.parameters[1].name, "b");
    }

    #[test]
    fn test_async_function() {
        let f = parse_function("async def fetch():\n    pass\n");
        assert!(f.is_async);
        assert_eq!(f.signature, "async def fetch()");
    }

    #[test]
    fn test_docstring() {
        let f = parse_function("def f():\n    \"\"\"Does things.\"\"\"\n    pass\n");
        assert_eq!(f.docstring, Some("Does things.".to_string()));
    }

    #[test]
    fn test_complexity_counts_branches() {
        let code = "\
def f(x):
    if x:
        return 1
    for i in range(3):
        while i:
            i -= 1
    assert x
    return 0
";
        // 1 + if + for + while + assert
        assert_eq!(parse_function(code).complexity, 5);
    }

    #[test]
    fn test_complexity_boolean_operands() {
        let f = parse_function("def f(a, b, c):\n    return a and b or c\n");
        // 1 + two boolean_operator nodes
        assert_eq!(f.complexity, 3);
    }

    #[test]
    fn test_complexity_excludes_nested_functions() {
        let code = "\
def outer(x):
    def inner(y):
        if y:
            return y
        return 0
    return inner(x)
";
        let f = parse_function(code);
        assert_eq!(f.complexity, 1);
        assert_eq!(f.nested_functions.len(), 1);
        assert_eq!(f.nested_functions[0].complexity, 2);
    }

    #[test]
    fn test_local_variables() {
        let code = "\
def f():
    total = 0
    if True:
        result = total
    return result
";
        let f = parse_function(code);
        let names: Vec<&str> = f.local_variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["total", "result"]);
        assert!(f
            .local_variables
            .iter()
            .all(|v| v.scope == VariableScope::Function));
    }

    #[test]
    fn test_static_and_classmethod_flags() {
        let code = "@staticmethod\ndef f():\n    pass\n";
        let tree = parse_python(code);
        let node = find_node(tree.root_node(), "function_definition").unwrap();
        let f = extract_function(&node, code, vec!["staticmethod".to_string()], true).unwrap();
        assert!(f.is_static);
        assert!(!f.is_class_method);
        assert!(f.is_method);
    }
}
