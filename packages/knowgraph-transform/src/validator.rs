//! Pre-upload script validation.
//!
//! Pure inspection: the validator never rewrites a script. A single error
//! makes the script ineligible for loading; warnings do not.

use crate::tuples::TupleSet;
use once_cell::sync::Lazy;
use regex::RegexSet;
use std::collections::HashSet;

const SAFE_SECTION_MARKER: &str = "// Safe interpolated version";
const STATEMENT_MARKER: &str = "// Statement ";
const PARAMETERS_MARKER: &str = "// Parameters:";

/// Patterns that indicate injection attempts or administrative commands a
/// generated script must never contain.
static FORBIDDEN_ALWAYS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)CALL\s+dbms",
        r"(?i)LOAD\s+CSV",
        r"(?i)apoc\.",
        r"(?i)DROP\s+DATABASE",
        r"(?i)CREATE\s+DATABASE",
        r"(?i)GRANT\s",
        r"(?i)DENY\s",
    ])
    .expect("forbidden pattern set")
});

/// Destructive clauses, additionally forbidden when the job is append-only.
static FORBIDDEN_APPEND_ONLY: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)DETACH\s+DELETE",
        r"(?i)\bDELETE\b",
        r"(?i)\bREMOVE\b",
        r"(?i)DROP\s+CONSTRAINT",
    ])
    .expect("append-only pattern set")
});

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_commands: usize,
    pub max_statement_chars: usize,
    /// Allowed relative deviation between statement count and tuple count.
    pub count_tolerance: f64,
    /// When true, destructive clauses are errors too.
    pub append_only: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_commands: 1_000_000,
            max_statement_chars: 10_000,
            count_tolerance: 0.01,
            append_only: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub statements: usize,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct ScriptValidator {
    config: ValidatorConfig,
}

impl Default for ScriptValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl ScriptValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a script against its tuple set.
    pub fn validate(&self, script: &str, tuples: &TupleSet) -> ValidationReport {
        let mut report = self.validate_script(script);

        let expected = tuples.nodes.len() + tuples.relationships.len();
        let tolerance = (expected as f64 * self.config.count_tolerance).ceil() as usize;
        let actual = report.statements;
        if actual.abs_diff(expected) > tolerance {
            report.errors.push(format!(
                "statement count {actual} does not match tuple count {expected} (±{tolerance})"
            ));
        }

        self.check_endpoints(tuples, &mut report);
        report
    }

    /// Structural checks on the script text alone.
    pub fn validate_script(&self, script: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        if script.trim().is_empty() {
            report.errors.push("script is empty".to_string());
            return report;
        }

        let statements = parse_parameterized_statements(script);
        report.statements = statements.len();

        if statements.len() > self.config.max_commands {
            report.errors.push(format!(
                "command count {} exceeds the cap of {}",
                statements.len(),
                self.config.max_commands
            ));
        }

        for (i, statement) in statements.iter().enumerate() {
            let label = format!("statement {}", i + 1);
            if !statement.trim_end().ends_with(';') {
                report.errors.push(format!("{label}: not terminated with ';'"));
            }
            if statement.len() > self.config.max_statement_chars {
                report.errors.push(format!(
                    "{label}: {} chars exceeds the {} char safety cap",
                    statement.len(),
                    self.config.max_statement_chars
                ));
            }
            if let Err(problem) = check_balanced(statement) {
                report.errors.push(format!("{label}: {problem}"));
            }
            for idx in FORBIDDEN_ALWAYS.matches(statement) {
                report
                    .errors
                    .push(format!("{label}: forbidden pattern #{idx} matched"));
            }
            if self.config.append_only {
                for idx in FORBIDDEN_APPEND_ONLY.matches(statement) {
                    report.errors.push(format!(
                        "{label}: destructive clause #{idx} in an append-only job"
                    ));
                }
            }
        }

        report
    }

    fn check_endpoints(&self, tuples: &TupleSet, report: &mut ValidationReport) {
        let keys: HashSet<&str> = tuples
            .nodes
            .iter()
            .map(|n| n.unique_key.as_str())
            .collect();
        let placeholders: HashSet<&str> = tuples
            .nodes
            .iter()
            .filter(|n| n.is_placeholder())
            .map(|n| n.unique_key.as_str())
            .collect();

        for (i, rel) in tuples.relationships.iter().enumerate() {
            for (key, label, side) in [
                (&rel.source_key, &rel.source_label, "source"),
                (&rel.target_key, &rel.target_label, "target"),
            ] {
                if !keys.contains(key.as_str()) {
                    report.errors.push(format!(
                        "relationship {}: {side} key {key:?} not present in the tuple set",
                        i + 1
                    ));
                } else if placeholders.contains(key.as_str()) && label.is_empty() {
                    report.errors.push(format!(
                        "relationship {}: placeholder {side} {key:?} referenced without a label",
                        i + 1
                    ));
                }
            }
        }
    }
}

/// Extract the parameterized statements: everything between a
/// `// Statement N` header and its `// Parameters:` marker, up to the safe
/// section.
fn parse_parameterized_statements(script: &str) -> Vec<String> {
    let parameterized = script
        .split(SAFE_SECTION_MARKER)
        .next()
        .unwrap_or(script);

    let mut statements = Vec::new();
    let mut current: Option<String> = None;

    for line in parameterized.lines() {
        if line.starts_with(STATEMENT_MARKER) {
            if let Some(stmt) = current.take() {
                statements.push(stmt);
            }
            current = Some(String::new());
            continue;
        }
        if line.starts_with(PARAMETERS_MARKER) {
            if let Some(stmt) = current.take() {
                statements.push(stmt);
            }
            continue;
        }
        if let Some(stmt) = &mut current {
            if !stmt.is_empty() {
                stmt.push('\n');
            }
            stmt.push_str(line);
        }
    }
    if let Some(stmt) = current.take() {
        statements.push(stmt);
    }
    statements
}

/// Balanced `{}`, `()`, `[]` outside single/double-quoted spans.
fn check_balanced(statement: &str) -> std::result::Result<(), String> {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut chars = statement.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(active) = quote {
            if c == '\\' {
                chars.next();
            } else if c == active {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '{' | '[' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return Err("unbalanced ')'".to_string());
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return Err("unbalanced '}'".to_string());
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return Err("unbalanced ']'".to_string());
                }
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    if let Some(open) = stack.pop() {
        return Err(format!("unclosed '{open}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::CypherGenerator;
    use crate::transformer::Transformer;
    use knowgraph_ir::ir::{
        ExtractionDocument, ExtractionMetadata, ExtractionStatistics,
    };
    use knowgraph_ir::{ProgressSender, PythonParser};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn tuples_for(sources: &[(&str, &str)]) -> TupleSet {
        let parser = PythonParser::new();
        let mut modules = BTreeMap::new();
        for (path, source) in sources {
            modules.insert(
                path.to_string(),
                parser.parse_module(path, source, "fp"),
            );
        }
        let doc = ExtractionDocument {
            metadata: ExtractionMetadata {
                job_id: Uuid::nil(),
                generated_at: chrono::Utc::now(),
                source_path: "/src".into(),
                file_count: modules.len(),
                parser_version: "test".into(),
            },
            modules,
            statistics: ExtractionStatistics::default(),
            errors: vec![],
            warnings: vec![],
        };
        Transformer::default().transform(
            &doc,
            Uuid::nil(),
            &ProgressSender::null(Uuid::nil(), "transform"),
        )
    }

    #[test]
    fn test_transformer_output_always_validates() {
        let tuples = tuples_for(&[
            ("pkg/a.py", "from .b import f\nimport os\nX = 1\n"),
            (
                "pkg/b.py",
                "class B(Base):\n    \"\"\"Doc with 'quotes' and \\\\ slashes.\"\"\"\n    def m(self):\n        pass\n",
            ),
        ]);
        let script = CypherGenerator::generate(&tuples);
        let report = ScriptValidator::default().validate(&script, &tuples);
        assert!(report.is_ok(), "errors: {:?}", report.errors);
        assert_eq!(
            report.statements,
            tuples.nodes.len() + tuples.relationships.len()
        );
    }

    #[test]
    fn test_empty_tuples_validate() {
        let tuples = TupleSet::empty(Uuid::nil());
        let script = CypherGenerator::generate(&tuples);
        let report = ScriptValidator::default().validate(&script, &tuples);
        assert!(report.is_ok(), "errors: {:?}", report.errors);
        assert_eq!(report.statements, 0);
    }

    #[test]
    fn test_empty_script_is_an_error() {
        let report = ScriptValidator::default().validate_script("   \n");
        assert!(!report.is_ok());
    }

    #[test]
    fn test_unterminated_statement() {
        let script = "// Statement 1\nMERGE (n:Module {path: $path})\n// Parameters:\n{}\n";
        let report = ScriptValidator::default().validate_script(script);
        assert!(report.errors.iter().any(|e| e.contains("not terminated")));
    }

    #[test]
    fn test_unbalanced_braces() {
        let script = "// Statement 1\nMERGE (n:Module {path: $path);\n// Parameters:\n{}\n";
        let report = ScriptValidator::default().validate_script(script);
        assert!(report.errors.iter().any(|e| e.contains("unbalanced")));
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        assert!(check_balanced("MERGE (n:M {x: '}{)('});").is_ok());
    }

    #[test]
    fn test_forbidden_patterns() {
        let script =
            "// Statement 1\nCALL dbms.security.listUsers();\n// Parameters:\n{}\n";
        let report = ScriptValidator::default().validate_script(script);
        assert!(report.errors.iter().any(|e| e.contains("forbidden")));
    }

    #[test]
    fn test_destructive_clause_append_only() {
        let script = "// Statement 1\nMATCH (n) DETACH DELETE n;\n// Parameters:\n{}\n";
        let strict = ScriptValidator::default().validate_script(script);
        assert!(!strict.is_ok());

        let permissive = ScriptValidator::new(ValidatorConfig {
            append_only: false,
            ..Default::default()
        })
        .validate_script(script);
        assert!(permissive.is_ok(), "errors: {:?}", permissive.errors);
    }

    #[test]
    fn test_command_count_cap() {
        let mut script = String::new();
        for i in 0..5 {
            script.push_str(&format!(
                "// Statement {}\nMERGE (n:M {{k: $k}});\n// Parameters:\n{{}}\n",
                i + 1
            ));
        }
        let report = ScriptValidator::new(ValidatorConfig {
            max_commands: 3,
            ..Default::default()
        })
        .validate_script(&script);
        assert!(report.errors.iter().any(|e| e.contains("command count")));
    }

    #[test]
    fn test_count_mismatch_detected() {
        let tuples = tuples_for(&[("a.py", "x = 1\n")]);
        // Script with a single statement against 3 tuples (2 nodes + 1 rel).
        let script = "// Statement 1\nMERGE (n:M {k: $k});\n// Parameters:\n{}\n";
        let report = ScriptValidator::default().validate(script, &tuples);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("does not match tuple count")));
    }

    #[test]
    fn test_missing_endpoint_detected() {
        let mut tuples = tuples_for(&[("a.py", "x = 1\n")]);
        tuples.relationships[0].target_key = "variable:a.py:module:gone".into();
        let script = CypherGenerator::generate(&tuples);
        let report = ScriptValidator::default().validate(&script, &tuples);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("not present in the tuple set")));
    }
}
