//! Python source parsing into [`ParsedModule`] via tree-sitter.
//!
//! A file with syntax errors still yields a ParsedModule: name, path, and
//! populated `parse_errors`, with no constructs extracted. Parsing never
//! aborts the surrounding extraction run.

pub mod extractors;

use crate::ir::{module_name_for_path, ParseErrorInfo, ParsedModule, VariableScope};
use extractors::classes::extract_class;
use extractors::functions::extract_function;
use extractors::imports::{extract_import_from_statement, extract_import_statement};
use extractors::variables::extract_assignment;
use tree_sitter::{Node, Parser};

/// Version tag mixed into content fingerprints. Bump on any change to the
/// extraction semantics so stale cache entries are invalidated.
pub const PARSER_VERSION: &str = "knowgraph-python/1";

#[derive(Debug, Clone, Default)]
pub struct PythonParser {
    /// Per-file parse budget; `None` disables the tree-sitter timeout.
    pub timeout: Option<std::time::Duration>,
}

impl PythonParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Parse one file's source into a [`ParsedModule`].
    ///
    /// `rel_path` is the repo-relative, `/`-separated path; `fingerprint` is
    /// the precomputed content fingerprint recorded on the module.
    pub fn parse_module(&self, rel_path: &str, source: &str, fingerprint: &str) -> ParsedModule {
        let mut module = ParsedModule::stub(rel_path, module_name_for_path(rel_path));
        module.line_count = source.lines().count();
        module.size_bytes = source.len() as u64;
        module.content_fingerprint = fingerprint.to_string();

        let mut parser = Parser::new();
        if parser.set_language(&tree_sitter_python::language()).is_err() {
            module.parse_errors.push(ParseErrorInfo {
                kind: "parser_init".into(),
                message: "failed to load Python grammar".into(),
                line: 0,
            });
            return module;
        }
        if let Some(timeout) = self.timeout {
            parser.set_timeout_micros(timeout.as_micros() as u64);
        }

        let Some(tree) = parser.parse(source, None) else {
            module.parse_errors.push(ParseErrorInfo {
                kind: "timeout".into(),
                message: "parse did not finish within the per-file budget".into(),
                line: 0,
            });
            return module;
        };

        let root = tree.root_node();
        if root.has_error() {
            collect_syntax_errors(&root, source, &mut module.parse_errors);
            return module;
        }

        self.walk_module(&root, source, &mut module);
        module
    }

    fn walk_module(&self, root: &Node, source: &str, module: &mut ParsedModule) {
        module.docstring = extractors::block_docstring(root, source);

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            match child.kind() {
                "import_statement" => {
                    module
                        .imports
                        .extend(extract_import_statement(&child, source));
                }
                "import_from_statement" => {
                    module
                        .imports
                        .extend(extract_import_from_statement(&child, source));
                }
                "class_definition" => {
                    if let Some(c) = extract_class(&child, source, Vec::new()) {
                        module.classes.push(c);
                    }
                }
                "function_definition" => {
                    if let Some(f) = extract_function(&child, source, Vec::new(), false) {
                        module.functions.push(f);
                    }
                }
                "decorated_definition" => {
                    let decorators = extractors::decorator_names(&child, source);
                    if let Some(def) = child.child_by_field_name("definition") {
                        match def.kind() {
                            "class_definition" => {
                                if let Some(c) = extract_class(&def, source, decorators) {
                                    module.classes.push(c);
                                }
                            }
                            "function_definition" => {
                                if let Some(f) =
                                    extract_function(&def, source, decorators, false)
                                {
                                    module.functions.push(f);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                "expression_statement" => {
                    if let Some(assign) = child.child(0).filter(|c| c.kind() == "assignment") {
                        if let Some(var) =
                            extract_assignment(&assign, source, VariableScope::Module)
                        {
                            module.variables.push(var);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn collect_syntax_errors(node: &Node, source: &str, errors: &mut Vec<ParseErrorInfo>) {
    if node.is_error() || node.is_missing() {
        let snippet: String = source[node.start_byte()..node.end_byte()]
            .chars()
            .take(60)
            .collect();
        errors.push(ParseErrorInfo {
            kind: if node.is_missing() {
                "missing".into()
            } else {
                "syntax".into()
            },
            message: format!("invalid syntax near: {snippet:?}"),
            line: node.start_position().row as u32 + 1,
        });
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_syntax_errors(&child, source, errors);
    }
}
