//! IR model: one [`ParsedModule`] per source file, assembled into an
//! [`ExtractionDocument`].
//!
//! Every type here derives explicit serde; property order on disk follows
//! struct declaration order, and the modules map is a `BTreeMap`, so the
//! serialized document has a stable key order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Parameter passing kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Positional,
    KeywordOnly,
    Vararg,
    Kwarg,
}

/// One function/method parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    pub position: usize,
    pub kind: ParameterKind,
    #[serde(default)]
    pub annotation: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

/// Scope a variable was bound in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    Module,
    Class,
    Function,
}

impl VariableScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableScope::Module => "module",
            VariableScope::Class => "class",
            VariableScope::Function => "function",
        }
    }
}

/// A single assignment captured at module, class, or function scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    #[serde(default)]
    pub inferred_type: Option<String>,
    #[serde(default)]
    pub value_repr: Option<String>,
    pub is_constant: bool,
    pub scope: VariableScope,
    pub line_start: u32,
    pub line_end: u32,
}

/// One import binding. `import a, b` produces two entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportInfo {
    /// Imported name: the module for plain imports, the bound name for
    /// from-imports (`*` for star imports).
    pub name: String,
    #[serde(default)]
    pub from_module: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    pub is_star: bool,
    pub is_relative: bool,
    pub relative_level: u32,
    pub line_start: u32,
    pub line_end: u32,
}

/// Function or method metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// Header text from `def` through the return annotation, without the
    /// trailing colon.
    pub signature: String,
    pub parameters: Vec<ParameterInfo>,
    #[serde(default)]
    pub return_type: Option<String>,
    pub decorators: Vec<String>,
    #[serde(default)]
    pub docstring: Option<String>,
    pub is_method: bool,
    pub is_static: bool,
    pub is_class_method: bool,
    pub is_async: bool,
    /// Cyclomatic complexity: 1 + branching statements in the body, not
    /// descending into nested definitions.
    pub complexity: u32,
    pub line_start: u32,
    pub line_end: u32,
    pub local_variables: Vec<VariableInfo>,
    pub nested_functions: Vec<FunctionInfo>,
}

/// Class metadata. Methods are [`FunctionInfo`] with `is_method = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    /// Base expressions as written in source.
    pub bases: Vec<String>,
    #[serde(default)]
    pub docstring: Option<String>,
    pub decorators: Vec<String>,
    /// True when a base's textual form mentions `ABC` or `Protocol`.
    pub is_interface_like: bool,
    pub methods: Vec<FunctionInfo>,
    pub class_variables: Vec<VariableInfo>,
    pub inner_classes: Vec<ClassInfo>,
    pub line_start: u32,
    pub line_end: u32,
}

/// A recorded per-file parse problem. Never fails the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseErrorInfo {
    pub kind: String,
    pub message: String,
    pub line: u32,
}

/// Intermediate representation of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedModule {
    /// Repo-relative path, `/`-separated.
    pub path: String,
    /// Dotted module name derived from the path.
    pub name: String,
    #[serde(default)]
    pub docstring: Option<String>,
    pub line_count: usize,
    pub size_bytes: u64,
    pub content_fingerprint: String,
    pub imports: Vec<ImportInfo>,
    pub classes: Vec<ClassInfo>,
    pub functions: Vec<FunctionInfo>,
    pub variables: Vec<VariableInfo>,
    pub parse_errors: Vec<ParseErrorInfo>,
}

impl ParsedModule {
    /// Skeleton module used for files that failed syntactic parsing.
    pub fn stub(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            docstring: None,
            line_count: 0,
            size_bytes: 0,
            content_fingerprint: String::new(),
            imports: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            variables: Vec::new(),
            parse_errors: Vec::new(),
        }
    }

    pub fn has_parse_errors(&self) -> bool {
        !self.parse_errors.is_empty()
    }
}

/// Dotted module name for a repo-relative path (`pkg/mod.py` → `pkg.mod`).
pub fn module_name_for_path(rel_path: &str) -> String {
    let trimmed = rel_path.strip_suffix(".py").unwrap_or(rel_path);
    let trimmed = trimmed
        .strip_suffix("/__init__")
        .unwrap_or(trimmed);
    trimmed.replace('/', ".")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub job_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub source_path: String,
    pub file_count: usize,
    pub parser_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStatistics {
    pub files_discovered: usize,
    pub files_parsed: usize,
    pub files_cached: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub total_classes: usize,
    pub total_functions: usize,
    pub total_variables: usize,
    pub total_imports: usize,
    pub total_lines: usize,
}

/// The extractor's output artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDocument {
    pub metadata: ExtractionMetadata,
    pub modules: BTreeMap<String, ParsedModule>,
    pub statistics: ExtractionStatistics,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ExtractionDocument {
    /// Aggregate per-module counts into the statistics block.
    pub fn recompute_statistics(&mut self) {
        let mut stats = ExtractionStatistics {
            files_discovered: self.statistics.files_discovered,
            files_parsed: self.statistics.files_parsed,
            files_cached: self.statistics.files_cached,
            files_failed: self.statistics.files_failed,
            files_skipped: self.statistics.files_skipped,
            ..Default::default()
        };
        for module in self.modules.values() {
            stats.total_classes += count_classes(&module.classes);
            stats.total_functions += module.functions.len();
            stats.total_variables += module.variables.len();
            stats.total_imports += module.imports.len();
            stats.total_lines += module.line_count;
        }
        self.statistics = stats;
    }
}

fn count_classes(classes: &[ClassInfo]) -> usize {
    classes
        .iter()
        .map(|c| 1 + count_classes(&c.inner_classes))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_module_name_for_path() {
        assert_eq!(module_name_for_path("a.py"), "a");
        assert_eq!(module_name_for_path("pkg/mod.py"), "pkg.mod");
        assert_eq!(module_name_for_path("pkg/__init__.py"), "pkg");
        assert_eq!(module_name_for_path("pkg/sub/deep.py"), "pkg.sub.deep");
    }

    #[test]
    fn test_parsed_module_roundtrip() {
        let module = ParsedModule {
            path: "pkg/a.py".into(),
            name: "pkg.a".into(),
            docstring: Some("Docs.".into()),
            line_count: 10,
            size_bytes: 120,
            content_fingerprint: "abc123".into(),
            imports: vec![ImportInfo {
                name: "os".into(),
                from_module: None,
                alias: None,
                is_star: false,
                is_relative: false,
                relative_level: 0,
                line_start: 1,
                line_end: 1,
            }],
            classes: vec![],
            functions: vec![FunctionInfo {
                name: "f".into(),
                signature: "def f(x: int) -> int".into(),
                parameters: vec![ParameterInfo {
                    name: "x".into(),
                    position: 0,
                    kind: ParameterKind::Positional,
                    annotation: Some("int".into()),
                    default: None,
                }],
                return_type: Some("int".into()),
                decorators: vec![],
                docstring: None,
                is_method: false,
                is_static: false,
                is_class_method: false,
                is_async: false,
                complexity: 1,
                line_start: 3,
                line_end: 4,
                local_variables: vec![],
                nested_functions: vec![],
            }],
            variables: vec![],
            parse_errors: vec![],
        };

        let json = serde_json::to_string(&module).unwrap();
        let back: ParsedModule = serde_json::from_str(&json).unwrap();
        assert_eq!(module, back);
    }

    #[test]
    fn test_statistics_counts_inner_classes() {
        let inner = ClassInfo {
            name: "Inner".into(),
            bases: vec![],
            docstring: None,
            decorators: vec![],
            is_interface_like: false,
            methods: vec![],
            class_variables: vec![],
            inner_classes: vec![],
            line_start: 2,
            line_end: 3,
        };
        let outer = ClassInfo {
            name: "Outer".into(),
            inner_classes: vec![inner],
            ..ClassInfo {
                name: String::new(),
                bases: vec![],
                docstring: None,
                decorators: vec![],
                is_interface_like: false,
                methods: vec![],
                class_variables: vec![],
                inner_classes: vec![],
                line_start: 1,
                line_end: 4,
            }
        };

        let mut module = ParsedModule::stub("a.py", "a");
        module.classes = vec![outer];

        let mut doc = ExtractionDocument {
            metadata: ExtractionMetadata {
                job_id: Uuid::new_v4(),
                generated_at: Utc::now(),
                source_path: "/tmp/src".into(),
                file_count: 1,
                parser_version: "test".into(),
            },
            modules: BTreeMap::from([("a.py".to_string(), module)]),
            statistics: ExtractionStatistics::default(),
            errors: vec![],
            warnings: vec![],
        };
        doc.recompute_statistics();
        assert_eq!(doc.statistics.total_classes, 2);
    }
}
