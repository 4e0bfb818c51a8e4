//! Cypher script generation.
//!
//! The script has two sections. The parameterized section is authoritative:
//! one MERGE statement per tuple, each followed by its JSON parameters
//! block. The trailing "safe" section repeats every statement with values
//! interpolated and escaped, for manual execution in a shell or browser.
//!
//! The file contains no timestamps and no tab characters; identical tuples
//! produce identical scripts.

use crate::tuples::{NodeTuple, Properties, PropertyValue, RelationshipTuple, TupleSet};

const BANNER: &str =
    "// ============================================================";

pub struct CypherGenerator;

impl CypherGenerator {
    /// Render the full script for a tuple set.
    pub fn generate(tuples: &TupleSet) -> String {
        let statements: Vec<(String, Properties)> = tuples
            .nodes
            .iter()
            .map(node_statement)
            .chain(tuples.relationships.iter().map(relationship_statement))
            .collect();

        let mut out = String::new();
        out.push_str(BANNER);
        out.push_str("\n// knowgraph cypher script\n");
        out.push_str(&format!("// job: {}\n", tuples.metadata.job_id));
        out.push_str(&format!("// statements: {}\n", statements.len()));
        out.push_str(BANNER);
        out.push_str("\n//\n");
        out.push_str("// Parameterized statements. Run each with a driver session:\n");
        out.push_str("//   session.run(query, parameters)\n\n");

        for (i, (query, params)) in statements.iter().enumerate() {
            out.push_str(&format!("// Statement {}\n", i + 1));
            out.push_str(query);
            out.push_str("\n// Parameters:\n");
            out.push_str(&serde_json::to_string_pretty(params).expect("properties serialize"));
            out.push_str("\n\n");
        }

        out.push_str(BANNER);
        out.push_str("\n// Safe interpolated version (manual execution)\n");
        out.push_str(BANNER);
        out.push('\n');
        for (query, params) in &statements {
            out.push_str(&interpolate(query, params));
            out.push('\n');
        }

        out
    }
}

/// Parameterized upsert for one node: MERGE on the declared match
/// properties, SET everything else plus the unique key.
pub fn node_statement(node: &NodeTuple) -> (String, Properties) {
    let match_clause = node
        .match_properties
        .iter()
        .map(|p| format!("{p}: ${p}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut set_parts = vec!["n.unique_key = $unique_key".to_string()];
    for key in node.properties.keys() {
        if !node.match_properties.contains(key) {
            set_parts.push(format!("n.{key} = ${key}"));
        }
    }

    let query = format!(
        "MERGE (n:{label} {{{match_clause}}})\nSET {set};",
        label = node.label,
        set = set_parts.join(",\n    "),
    );

    let mut params = node.properties.clone();
    params.insert(
        "unique_key".to_string(),
        PropertyValue::String(node.unique_key.clone()),
    );
    (query, params)
}

/// Parameterized upsert for one relationship: endpoints matched by unique
/// key, relationship MERGEd, properties SET.
pub fn relationship_statement(rel: &RelationshipTuple) -> (String, Properties) {
    let set_clause = if rel.properties.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = rel
            .properties
            .keys()
            .map(|key| format!("r.{key} = ${key}"))
            .collect();
        format!("\nSET {}", parts.join(",\n    "))
    };

    let query = format!(
        "MATCH (a:{source_label} {{unique_key: $source_key}})\nMATCH (b:{target_label} {{unique_key: $target_key}})\nMERGE (a)-[r:{rel_type}]->(b){set_clause};",
        source_label = rel.source_label,
        target_label = rel.target_label,
        rel_type = rel.rel_type,
    );

    let mut params = rel.properties.clone();
    params.insert(
        "source_key".to_string(),
        PropertyValue::String(rel.source_key.clone()),
    );
    params.insert(
        "target_key".to_string(),
        PropertyValue::String(rel.target_key.clone()),
    );
    (query, params)
}

/// Substitute `$name` placeholders with escaped literal values. Longer
/// parameter names are substituted first so `$name` never clobbers
/// `$name_full`.
fn interpolate(query: &str, params: &Properties) -> String {
    let mut names: Vec<&String> = params.keys().collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));

    let mut out = query.to_string();
    for name in names {
        out = out.replace(&format!("${name}"), &literal(&params[name]));
    }
    out
}

/// Render one value as a cypher literal: strings quoted with backslashes and
/// quotes escaped, booleans and nulls literal, lists bracketed.
fn literal(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Null => "null".to_string(),
        PropertyValue::Bool(b) => b.to_string(),
        PropertyValue::Int(i) => i.to_string(),
        PropertyValue::Float(f) => f.to_string(),
        PropertyValue::String(s) => {
            let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
            format!("'{escaped}'")
        }
        PropertyValue::List(items) => {
            let rendered: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", rendered.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn module_node() -> NodeTuple {
        NodeTuple {
            label: "Module".into(),
            unique_key: "module:a.py".into(),
            properties: BTreeMap::from([
                ("path".to_string(), PropertyValue::from("a.py")),
                ("name".to_string(), PropertyValue::from("a")),
                ("docstring".to_string(), PropertyValue::Null),
            ]),
            match_properties: vec!["path".to_string()],
        }
    }

    #[test]
    fn test_node_statement_shape() {
        let (query, params) = node_statement(&module_node());
        assert!(query.starts_with("MERGE (n:Module {path: $path})"));
        assert!(query.contains("n.unique_key = $unique_key"));
        assert!(query.contains("n.name = $name"));
        assert!(!query.contains("n.path = $path")); // match key not re-SET
        assert!(query.ends_with(';'));
        assert_eq!(
            params.get("unique_key"),
            Some(&PropertyValue::String("module:a.py".into()))
        );
    }

    #[test]
    fn test_relationship_statement_shape() {
        let rel = RelationshipTuple {
            source_key: "module:a.py".into(),
            target_key: "module:os".into(),
            rel_type: "IMPORTS".into(),
            source_label: "Module".into(),
            target_label: "Module".into(),
            properties: BTreeMap::from([(
                "is_star".to_string(),
                PropertyValue::Bool(false),
            )]),
        };
        let (query, params) = relationship_statement(&rel);
        assert!(query.contains("MATCH (a:Module {unique_key: $source_key})"));
        assert!(query.contains("MERGE (a)-[r:IMPORTS]->(b)"));
        assert!(query.contains("SET r.is_star = $is_star"));
        assert!(params.contains_key("source_key"));
        assert!(params.contains_key("target_key"));
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(
            literal(&PropertyValue::String("it's a \\ path".into())),
            "'it\\'s a \\\\ path'"
        );
        assert_eq!(literal(&PropertyValue::Bool(true)), "true");
        assert_eq!(literal(&PropertyValue::Null), "null");
        assert_eq!(
            literal(&PropertyValue::List(vec![
                PropertyValue::String("a".into()),
                PropertyValue::Int(2),
            ])),
            "['a', 2]"
        );
    }

    #[test]
    fn test_interpolate_prefers_longer_names() {
        let params = BTreeMap::from([
            ("name".to_string(), PropertyValue::from("short")),
            ("name_full".to_string(), PropertyValue::from("long")),
        ]);
        let out = interpolate("SET n.a = $name, n.b = $name_full", &params);
        assert_eq!(out, "SET n.a = 'short', n.b = 'long'");
    }

    #[test]
    fn test_generate_full_script() {
        let mut set = TupleSet::empty(Uuid::nil());
        set.nodes.push(module_node());
        set.metadata.node_count = 1;

        let script = CypherGenerator::generate(&set);
        assert!(script.contains("// Statement 1"));
        assert!(script.contains("// Parameters:"));
        assert!(script.contains("Safe interpolated version"));
        assert!(script.contains("MERGE (n:Module {path: 'a.py'})"));
        assert!(!script.contains('\t'));
    }

    #[test]
    fn test_generate_is_deterministic() {
        let mut set = TupleSet::empty(Uuid::nil());
        set.nodes.push(module_node());
        let a = CypherGenerator::generate(&set);
        let b = CypherGenerator::generate(&set);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_set_script_has_banner_only() {
        let script = CypherGenerator::generate(&TupleSet::empty(Uuid::nil()));
        assert!(script.contains("// statements: 0"));
        assert!(!script.contains("// Statement 1"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Interpolated string literals are quote-delimited and every
            /// interior quote is escaped, for arbitrary content.
            #[test]
            fn prop_string_literal_escaping(s in "\\PC{0,40}") {
                let rendered = literal(&PropertyValue::String(s));
                prop_assert!(rendered.starts_with('\''));
                prop_assert!(rendered.ends_with('\''));

                let interior = rendered[1..rendered.len() - 1].as_bytes();
                let mut i = 0;
                while i < interior.len() {
                    if interior[i] == b'\\' {
                        i += 2;
                    } else {
                        prop_assert!(interior[i] != b'\'');
                        i += 1;
                    }
                }
            }
        }
    }
}
