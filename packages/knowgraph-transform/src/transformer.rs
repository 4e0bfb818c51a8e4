//! Extraction document → graph tuples.
//!
//! Output is deterministic: modules are walked in map order, nodes are
//! sorted by `(label, unique_key)` and relationships by
//! `(rel_type, source_key, target_key)` with a stable sort, and all property
//! maps are BTreeMaps. Identical input produces byte-identical output.
//!
//! Above the streaming threshold the transformer processes modules in
//! batches and writes node tuples out incrementally, so peak memory stays
//! bounded by one batch plus the (much smaller) relationship set.

use crate::error::Result;
use crate::tuples::{
    NodeTuple, Properties, PropertyValue, RelationshipTuple, TupleMetadata, TupleSet,
};
use knowgraph_ir::ir::{ClassInfo, ExtractionDocument, ImportInfo, ParsedModule};
use knowgraph_ir::progress::ProgressSender;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_STREAMING_THRESHOLD: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransformerConfig {
    /// Modules per batch in streaming mode.
    pub batch_size: usize,
    /// Extraction documents larger than this are processed in streaming mode.
    pub streaming_threshold_bytes: u64,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            streaming_threshold_bytes: DEFAULT_STREAMING_THRESHOLD,
        }
    }
}

pub fn module_key(path: &str) -> String {
    format!("module:{path}")
}

pub fn class_key(path: &str, name: &str) -> String {
    format!("class:{path}:{name}")
}

pub fn external_class_key(name: &str) -> String {
    format!("class:external:{name}")
}

pub fn method_key(path: &str, class: &str, name: &str) -> String {
    format!("method:{path}:{class}:{name}")
}

pub fn function_key(path: &str, name: &str) -> String {
    format!("function:{path}:{name}")
}

pub fn variable_key(path: &str, scope: &str, name: &str) -> String {
    format!("variable:{path}:{scope}:{name}")
}

/// Name index built in a cheap pre-pass: class name → defining module path
/// (first definition in module order wins), plus the set of module paths.
struct ExtractionIndex {
    class_modules: BTreeMap<String, String>,
    module_paths: BTreeSet<String>,
}

impl ExtractionIndex {
    fn build(doc: &ExtractionDocument) -> Self {
        let mut class_modules = BTreeMap::new();
        let mut module_paths = BTreeSet::new();
        for (path, module) in &doc.modules {
            module_paths.insert(path.clone());
            index_classes(&module.classes, path, &mut class_modules);
        }
        Self {
            class_modules,
            module_paths,
        }
    }
}

fn index_classes(classes: &[ClassInfo], path: &str, out: &mut BTreeMap<String, String>) {
    for class in classes {
        out.entry(class.name.clone()).or_insert_with(|| path.to_string());
        index_classes(&class.inner_classes, path, out);
    }
}

pub struct Transformer {
    config: TransformerConfig,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(TransformerConfig::default())
    }
}

impl Transformer {
    pub fn new(config: TransformerConfig) -> Self {
        Self { config }
    }

    /// Transform an extraction document into an in-memory [`TupleSet`].
    pub fn transform(
        &self,
        doc: &ExtractionDocument,
        job_id: Uuid,
        progress: &ProgressSender,
    ) -> TupleSet {
        let index = ExtractionIndex::build(doc);
        let total = doc.modules.len() as u64;
        progress.started(total, format!("transforming {total} modules"));

        let mut nodes: Vec<NodeTuple> = Vec::new();
        let mut relationships: Vec<RelationshipTuple> = Vec::new();
        let mut seen_keys: HashSet<String> = HashSet::new();

        let modules: Vec<(&String, &ParsedModule)> = doc.modules.iter().collect();
        let mut processed = 0u64;
        for batch in modules.chunks(self.config.batch_size.max(1)) {
            // Parallel per-module generation; order restored by collecting
            // the batch in input order, so determinism is untouched.
            let generated: Vec<(Vec<NodeTuple>, Vec<RelationshipTuple>)> = batch
                .par_iter()
                .map(|(path, module)| module_tuples(path, module, &index))
                .collect();

            for (batch_nodes, batch_rels) in generated {
                for node in batch_nodes {
                    if seen_keys.insert(node.unique_key.clone()) {
                        nodes.push(node);
                    }
                }
                relationships.extend(batch_rels);
            }

            processed += batch.len() as u64;
            progress.step_completed(processed, total, format!("{processed}/{total} modules"));
        }

        append_placeholders(&relationships, &mut seen_keys, &mut nodes);
        sort_nodes(&mut nodes);
        sort_relationships(&mut relationships);

        let set = TupleSet {
            metadata: TupleMetadata {
                job_id,
                node_count: nodes.len(),
                relationship_count: relationships.len(),
                modules_processed: doc.modules.len(),
            },
            nodes,
            relationships,
        };

        progress.finished(
            total,
            format!(
                "{} nodes, {} relationships",
                set.metadata.node_count, set.metadata.relationship_count
            ),
            serde_json::json!({
                "nodes": set.metadata.node_count,
                "relationships": set.metadata.relationship_count,
                "modules_processed": set.metadata.modules_processed,
            }),
        );
        set
    }

    /// Streaming transform: node tuples are written to `out` batch by batch
    /// instead of being held in memory; relationships and placeholder keys
    /// are accumulated and flushed at the end. The resulting file has the
    /// same document shape as [`TupleSet`].
    pub fn transform_streaming<W: Write>(
        &self,
        doc: &ExtractionDocument,
        job_id: Uuid,
        out: &mut W,
        progress: &ProgressSender,
    ) -> Result<TupleMetadata> {
        let index = ExtractionIndex::build(doc);
        let total = doc.modules.len() as u64;
        progress.started(total, format!("transforming {total} modules (streaming)"));

        let mut relationships: Vec<RelationshipTuple> = Vec::new();
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut node_count = 0usize;

        // Metadata is not known up front in streaming mode; the document is
        // assembled nodes-first and metadata written last, keeping the same
        // top-level keys by writing into a placeholder slot is not possible
        // with pure streaming, so the order here is nodes, relationships,
        // then metadata.
        out.write_all(b"{\n  \"nodes\": [")?;

        let modules: Vec<(&String, &ParsedModule)> = doc.modules.iter().collect();
        let mut processed = 0u64;
        let mut first = true;
        for batch in modules.chunks(self.config.batch_size.max(1)) {
            let generated: Vec<(Vec<NodeTuple>, Vec<RelationshipTuple>)> = batch
                .par_iter()
                .map(|(path, module)| module_tuples(path, module, &index))
                .collect();

            let mut batch_nodes: Vec<NodeTuple> = Vec::new();
            for (nodes, rels) in generated {
                for node in nodes {
                    if seen_keys.insert(node.unique_key.clone()) {
                        batch_nodes.push(node);
                    }
                }
                relationships.extend(rels);
            }
            sort_nodes(&mut batch_nodes);

            for node in &batch_nodes {
                write_element(out, node, &mut first)?;
            }
            node_count += batch_nodes.len();

            processed += batch.len() as u64;
            progress.step_completed(processed, total, format!("{processed}/{total} modules"));
            debug!(processed, node_count, "streamed batch");
        }

        let mut placeholders: Vec<NodeTuple> = Vec::new();
        append_placeholders(&relationships, &mut seen_keys, &mut placeholders);
        sort_nodes(&mut placeholders);
        for node in &placeholders {
            write_element(out, node, &mut first)?;
        }
        node_count += placeholders.len();

        sort_relationships(&mut relationships);
        out.write_all(b"\n  ],\n  \"relationships\": [")?;
        let mut first = true;
        for rel in &relationships {
            write_element(out, rel, &mut first)?;
        }

        let metadata = TupleMetadata {
            job_id,
            node_count,
            relationship_count: relationships.len(),
            modules_processed: doc.modules.len(),
        };
        out.write_all(b"\n  ],\n  \"metadata\": ")?;
        serde_json::to_writer(&mut *out, &metadata)?;
        out.write_all(b"\n}\n")?;

        progress.finished(
            total,
            format!("{node_count} nodes, {} relationships", relationships.len()),
            serde_json::json!({
                "nodes": node_count,
                "relationships": relationships.len(),
                "modules_processed": metadata.modules_processed,
            }),
        );
        Ok(metadata)
    }

    /// Whether a given extraction document size calls for streaming mode.
    pub fn should_stream(&self, input_size_bytes: u64) -> bool {
        input_size_bytes > self.config.streaming_threshold_bytes
    }
}

fn write_element<W: Write, T: serde::Serialize>(
    out: &mut W,
    value: &T,
    first: &mut bool,
) -> Result<()> {
    if *first {
        *first = false;
        out.write_all(b"\n    ")?;
    } else {
        out.write_all(b",\n    ")?;
    }
    serde_json::to_writer(&mut *out, value)?;
    Ok(())
}

fn sort_nodes(nodes: &mut [NodeTuple]) {
    nodes.sort_by(|a, b| (&a.label, &a.unique_key).cmp(&(&b.label, &b.unique_key)));
}

fn sort_relationships(rels: &mut [RelationshipTuple]) {
    rels.sort_by(|a, b| {
        (&a.rel_type, &a.source_key, &a.target_key).cmp(&(&b.rel_type, &b.source_key, &b.target_key))
    });
}

/// Synthesize placeholder nodes for every relationship endpoint that does not
/// name a node already in the set.
fn append_placeholders(
    relationships: &[RelationshipTuple],
    seen_keys: &mut HashSet<String>,
    nodes: &mut Vec<NodeTuple>,
) {
    let mut placeholders: BTreeMap<String, NodeTuple> = BTreeMap::new();
    for rel in relationships {
        for (key, label) in [
            (&rel.source_key, &rel.source_label),
            (&rel.target_key, &rel.target_label),
        ] {
            if seen_keys.contains(key) || placeholders.contains_key(key) {
                continue;
            }
            placeholders.insert(key.clone(), placeholder_node(key, label));
        }
    }
    for (key, node) in placeholders {
        seen_keys.insert(key);
        nodes.push(node);
    }
}

fn placeholder_node(key: &str, label: &str) -> NodeTuple {
    let name = key
        .rsplit(':')
        .next()
        .unwrap_or(key)
        .to_string();
    // Module placeholder keys are "module:<dotted name>"; keep the full
    // dotted form rather than the last segment.
    let name = if let Some(module_name) = key.strip_prefix("module:") {
        module_name.to_string()
    } else {
        name
    };
    NodeTuple {
        label: label.to_string(),
        unique_key: key.to_string(),
        properties: Properties::from([
            ("name".to_string(), PropertyValue::String(name)),
            ("placeholder".to_string(), PropertyValue::Bool(true)),
        ]),
        match_properties: vec!["name".to_string()],
    }
}

/// Generate the node and relationship tuples for one module.
fn module_tuples(
    path: &str,
    module: &ParsedModule,
    index: &ExtractionIndex,
) -> (Vec<NodeTuple>, Vec<RelationshipTuple>) {
    let mut nodes = Vec::new();
    let mut rels = Vec::new();
    let mkey = module_key(path);

    nodes.push(NodeTuple {
        label: "Module".into(),
        unique_key: mkey.clone(),
        properties: Properties::from([
            ("path".to_string(), PropertyValue::from(path)),
            ("name".to_string(), PropertyValue::from(module.name.clone())),
            (
                "line_count".to_string(),
                PropertyValue::from(module.line_count),
            ),
            (
                "size_bytes".to_string(),
                PropertyValue::Int(module.size_bytes as i64),
            ),
            (
                "docstring".to_string(),
                PropertyValue::from(module.docstring.clone()),
            ),
        ]),
        match_properties: vec!["path".to_string()],
    });

    for class in &module.classes {
        class_tuples(path, &mkey, class, index, true, &mut nodes, &mut rels);
    }

    for function in &module.functions {
        let fkey = function_key(path, &function.name);
        nodes.push(NodeTuple {
            label: "Function".into(),
            unique_key: fkey.clone(),
            properties: Properties::from([
                ("name".to_string(), PropertyValue::from(function.name.clone())),
                ("module_path".to_string(), PropertyValue::from(path)),
                (
                    "signature".to_string(),
                    PropertyValue::from(function.signature.clone()),
                ),
                (
                    "line_start".to_string(),
                    PropertyValue::from(function.line_start),
                ),
                (
                    "line_end".to_string(),
                    PropertyValue::from(function.line_end),
                ),
                (
                    "decorators".to_string(),
                    PropertyValue::from(function.decorators.clone()),
                ),
                (
                    "return_type".to_string(),
                    PropertyValue::from(function.return_type.clone()),
                ),
            ]),
            match_properties: vec!["name".to_string(), "module_path".to_string()],
        });
        rels.push(contains(&mkey, "Module", &fkey, "Function"));
    }

    for variable in &module.variables {
        let vkey = variable_key(path, variable.scope.as_str(), &variable.name);
        nodes.push(variable_node(path, &vkey, variable));
        rels.push(contains(&mkey, "Module", &vkey, "Variable"));
    }

    for import in &module.imports {
        rels.push(import_relationship(path, &mkey, import, index));
    }

    (nodes, rels)
}

fn class_tuples(
    path: &str,
    mkey: &str,
    class: &ClassInfo,
    index: &ExtractionIndex,
    top_level: bool,
    nodes: &mut Vec<NodeTuple>,
    rels: &mut Vec<RelationshipTuple>,
) {
    let ckey = class_key(path, &class.name);
    nodes.push(NodeTuple {
        label: "Class".into(),
        unique_key: ckey.clone(),
        properties: Properties::from([
            ("name".to_string(), PropertyValue::from(class.name.clone())),
            ("module_path".to_string(), PropertyValue::from(path)),
            (
                "docstring".to_string(),
                PropertyValue::from(class.docstring.clone()),
            ),
            (
                "line_start".to_string(),
                PropertyValue::from(class.line_start),
            ),
            ("line_end".to_string(), PropertyValue::from(class.line_end)),
            ("bases".to_string(), PropertyValue::from(class.bases.clone())),
            (
                "decorators".to_string(),
                PropertyValue::from(class.decorators.clone()),
            ),
        ]),
        match_properties: vec!["name".to_string(), "module_path".to_string()],
    });

    if top_level {
        rels.push(contains(mkey, "Module", &ckey, "Class"));
    }

    for base in &class.bases {
        let target_key = match index.class_modules.get(base) {
            Some(defining_path) => class_key(defining_path, base),
            None => external_class_key(base),
        };
        rels.push(RelationshipTuple {
            source_key: ckey.clone(),
            target_key,
            rel_type: "INHERITS_FROM".into(),
            source_label: "Class".into(),
            target_label: "Class".into(),
            properties: Properties::new(),
        });
    }

    for method in &class.methods {
        let key = method_key(path, &class.name, &method.name);
        nodes.push(NodeTuple {
            label: "Method".into(),
            unique_key: key.clone(),
            properties: Properties::from([
                ("name".to_string(), PropertyValue::from(method.name.clone())),
                (
                    "class_name".to_string(),
                    PropertyValue::from(class.name.clone()),
                ),
                ("module_path".to_string(), PropertyValue::from(path)),
                (
                    "signature".to_string(),
                    PropertyValue::from(method.signature.clone()),
                ),
                (
                    "line_start".to_string(),
                    PropertyValue::from(method.line_start),
                ),
                ("line_end".to_string(), PropertyValue::from(method.line_end)),
                (
                    "decorators".to_string(),
                    PropertyValue::from(method.decorators.clone()),
                ),
                (
                    "is_static".to_string(),
                    PropertyValue::from(method.is_static),
                ),
                (
                    "is_class_method".to_string(),
                    PropertyValue::from(method.is_class_method),
                ),
                (
                    "return_type".to_string(),
                    PropertyValue::from(method.return_type.clone()),
                ),
            ]),
            match_properties: vec![
                "name".to_string(),
                "class_name".to_string(),
                "module_path".to_string(),
            ],
        });
        rels.push(contains(&ckey, "Class", &key, "Method"));
        rels.push(RelationshipTuple {
            source_key: ckey.clone(),
            target_key: key,
            rel_type: "HAS_METHOD".into(),
            source_label: "Class".into(),
            target_label: "Method".into(),
            properties: Properties::new(),
        });
    }

    for variable in &class.class_variables {
        let vkey = variable_key(path, variable.scope.as_str(), &variable.name);
        nodes.push(variable_node(path, &vkey, variable));
        rels.push(contains(mkey, "Module", &vkey, "Variable"));
    }

    for inner in &class.inner_classes {
        let inner_key = class_key(path, &inner.name);
        rels.push(contains(&ckey, "Class", &inner_key, "Class"));
        class_tuples(path, mkey, inner, index, false, nodes, rels);
    }
}

fn variable_node(path: &str, key: &str, variable: &knowgraph_ir::ir::VariableInfo) -> NodeTuple {
    NodeTuple {
        label: "Variable".into(),
        unique_key: key.to_string(),
        properties: Properties::from([
            ("name".to_string(), PropertyValue::from(variable.name.clone())),
            ("module_path".to_string(), PropertyValue::from(path)),
            (
                "scope".to_string(),
                PropertyValue::from(variable.scope.as_str()),
            ),
            (
                "inferred_type".to_string(),
                PropertyValue::from(variable.inferred_type.clone()),
            ),
            (
                "value_repr".to_string(),
                PropertyValue::from(variable.value_repr.clone()),
            ),
            (
                "is_constant".to_string(),
                PropertyValue::from(variable.is_constant),
            ),
            (
                "line_start".to_string(),
                PropertyValue::from(variable.line_start),
            ),
            (
                "line_end".to_string(),
                PropertyValue::from(variable.line_end),
            ),
        ]),
        match_properties: vec![
            "name".to_string(),
            "scope".to_string(),
            "module_path".to_string(),
        ],
    }
}

fn contains(
    source_key: &str,
    source_label: &str,
    target_key: &str,
    target_label: &str,
) -> RelationshipTuple {
    RelationshipTuple {
        source_key: source_key.to_string(),
        target_key: target_key.to_string(),
        rel_type: "CONTAINS".into(),
        source_label: source_label.to_string(),
        target_label: target_label.to_string(),
        properties: Properties::new(),
    }
}

fn import_relationship(
    path: &str,
    mkey: &str,
    import: &ImportInfo,
    index: &ExtractionIndex,
) -> RelationshipTuple {
    let target_key = match &import.from_module {
        Some(from_module) if import.is_relative => {
            resolve_relative_import(path, from_module, import.relative_level, import, index)
                .map(|resolved| module_key(&resolved))
                .unwrap_or_else(|| module_key(from_module))
        }
        Some(from_module) => module_key(from_module),
        None => module_key(&import.name),
    };

    RelationshipTuple {
        source_key: mkey.to_string(),
        target_key,
        rel_type: "IMPORTS".into(),
        source_label: "Module".into(),
        target_label: "Module".into(),
        properties: Properties::from([
            (
                "import_name".to_string(),
                PropertyValue::from(import.name.clone()),
            ),
            ("alias".to_string(), PropertyValue::from(import.alias.clone())),
            (
                "from_module".to_string(),
                PropertyValue::from(import.from_module.clone()),
            ),
            ("is_star".to_string(), PropertyValue::from(import.is_star)),
            (
                "line_start".to_string(),
                PropertyValue::from(import.line_start),
            ),
        ]),
    }
}

/// Resolve a relative import against the importing module's path. Walks up
/// `level - 1` packages from the module's directory, then appends the named
/// module (or, for bare `from . import name`, the imported name itself).
fn resolve_relative_import(
    module_path: &str,
    from_module: &str,
    level: u32,
    import: &ImportInfo,
    index: &ExtractionIndex,
) -> Option<String> {
    let mut components: Vec<&str> = module_path.split('/').collect();
    components.pop()?; // file name

    for _ in 1..level {
        components.pop()?;
    }

    let named = from_module.trim_start_matches('.');
    let mut base: Vec<String> = components.iter().map(|s| s.to_string()).collect();

    let candidates: Vec<String> = if named.is_empty() {
        // `from . import name`: the imported name is the submodule.
        let mut with_name = base.clone();
        with_name.push(import.name.clone());
        vec![
            format!("{}.py", with_name.join("/")),
            format!("{}/__init__.py", with_name.join("/")),
        ]
    } else {
        base.extend(named.split('.').map(|s| s.to_string()));
        vec![
            format!("{}.py", base.join("/")),
            format!("{}/__init__.py", base.join("/")),
        ]
    };

    candidates
        .into_iter()
        .find(|candidate| index.module_paths.contains(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowgraph_ir::ir::{ExtractionMetadata, ExtractionStatistics};
    use knowgraph_ir::PythonParser;
    use pretty_assertions::assert_eq;

    fn doc_from_sources(sources: &[(&str, &str)]) -> ExtractionDocument {
        let parser = PythonParser::new();
        let mut modules = BTreeMap::new();
        for (path, source) in sources {
            modules.insert(
                path.to_string(),
                parser.parse_module(path, source, &format!("fp-{path}")),
            );
        }
        ExtractionDocument {
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
        }
    }

    fn transform(sources: &[(&str, &str)]) -> TupleSet {
        let doc = doc_from_sources(sources);
        Transformer::default().transform(
            &doc,
            Uuid::nil(),
            &ProgressSender::null(Uuid::nil(), "transform"),
        )
    }

    #[test]
    fn test_tiny_tree_tuples() {
        let set = transform(&[("a.py", "x = 1\n")]);

        assert_eq!(set.nodes.len(), 2);
        assert_eq!(set.relationships.len(), 1);

        let keys: Vec<&str> = set.nodes.iter().map(|n| n.unique_key.as_str()).collect();
        assert!(keys.contains(&"module:a.py"));
        assert!(keys.contains(&"variable:a.py:module:x"));

        let rel = &set.relationships[0];
        assert_eq!(rel.rel_type, "CONTAINS");
        assert_eq!(rel.source_key, "module:a.py");
        assert_eq!(rel.target_key, "variable:a.py:module:x");
    }

    #[test]
    fn test_relative_import_resolves_to_sibling() {
        let set = transform(&[
            ("pkg/a.py", "from .b import f\n"),
            ("pkg/b.py", "def f():\n    pass\n"),
        ]);

        let imports: Vec<&RelationshipTuple> = set
            .relationships
            .iter()
            .filter(|r| r.rel_type == "IMPORTS")
            .collect();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].source_key, "module:pkg/a.py");
        assert_eq!(imports[0].target_key, "module:pkg/b.py");

        // Resolved target is a real module node, not a placeholder.
        let target = set
            .nodes
            .iter()
            .find(|n| n.unique_key == "module:pkg/b.py")
            .unwrap();
        assert!(!target.is_placeholder());
    }

    #[test]
    fn test_unresolved_import_gets_placeholder() {
        let set = transform(&[("a.py", "import requests\n")]);

        let placeholder = set
            .nodes
            .iter()
            .find(|n| n.unique_key == "module:requests")
            .expect("placeholder node");
        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.label, "Module");
        assert_eq!(
            placeholder.properties.get("name"),
            Some(&PropertyValue::String("requests".into()))
        );

        let import = set
            .relationships
            .iter()
            .find(|r| r.rel_type == "IMPORTS")
            .unwrap();
        assert_eq!(import.target_key, "module:requests");
    }

    #[test]
    fn test_inheritance_resolution_and_external_base() {
        let set = transform(&[
            ("base.py", "class Base:\n    pass\n"),
            ("child.py", "class Child(Base, abc.ABC):\n    pass\n"),
        ]);

        let inherits: Vec<&RelationshipTuple> = set
            .relationships
            .iter()
            .filter(|r| r.rel_type == "INHERITS_FROM")
            .collect();
        assert_eq!(inherits.len(), 2);

        let targets: Vec<&str> = inherits.iter().map(|r| r.target_key.as_str()).collect();
        assert!(targets.contains(&"class:base.py:Base"));
        assert!(targets.contains(&"class:external:abc.ABC"));

        let external = set
            .nodes
            .iter()
            .find(|n| n.unique_key == "class:external:abc.ABC")
            .unwrap();
        assert!(external.is_placeholder());
        assert_eq!(external.label, "Class");
    }

    #[test]
    fn test_methods_get_contains_and_has_method() {
        let set = transform(&[(
            "m.py",
            "class C:\n    def run(self):\n        pass\n",
        )]);

        let method_rels: Vec<&str> = set
            .relationships
            .iter()
            .filter(|r| r.target_key == "method:m.py:C:run")
            .map(|r| r.rel_type.as_str())
            .collect();
        assert!(method_rels.contains(&"CONTAINS"));
        assert!(method_rels.contains(&"HAS_METHOD"));
    }

    #[test]
    fn test_endpoint_closure() {
        let set = transform(&[
            ("pkg/a.py", "from .b import f\nimport os\n"),
            ("pkg/b.py", "class B(Missing):\n    X = 1\n"),
        ]);

        let keys: HashSet<&str> = set.nodes.iter().map(|n| n.unique_key.as_str()).collect();
        for rel in &set.relationships {
            assert!(keys.contains(rel.source_key.as_str()), "{}", rel.source_key);
            assert!(keys.contains(rel.target_key.as_str()), "{}", rel.target_key);
        }
    }

    #[test]
    fn test_determinism_byte_equal() {
        let sources = [
            ("pkg/a.py", "from .b import f\nimport os\nX = 1\n"),
            ("pkg/b.py", "class B:\n    def m(self):\n        pass\n"),
        ];
        let a = transform(&sources).to_canonical_json().unwrap();
        let b = transform(&sources).to_canonical_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_document_empty_tuples() {
        let set = transform(&[]);
        assert!(set.nodes.is_empty());
        assert!(set.relationships.is_empty());
        assert_eq!(set.metadata.modules_processed, 0);
    }

    #[test]
    fn test_nodes_sorted_by_label_then_key() {
        let set = transform(&[(
            "m.py",
            "import os\n\nclass C:\n    pass\n\ndef f():\n    pass\n",
        )]);
        let sorted: Vec<(String, String)> = set
            .nodes
            .iter()
            .map(|n| (n.label.clone(), n.unique_key.clone()))
            .collect();
        let mut expected = sorted.clone();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_streaming_output_parses_and_matches_counts() {
        let doc = doc_from_sources(&[
            ("pkg/a.py", "from .b import f\nimport os\nX = 1\n"),
            ("pkg/b.py", "class B:\n    def m(self):\n        pass\n"),
        ]);
        let transformer = Transformer::new(TransformerConfig {
            batch_size: 1,
            ..Default::default()
        });

        let in_memory = transformer.transform(
            &doc,
            Uuid::nil(),
            &ProgressSender::null(Uuid::nil(), "transform"),
        );

        let mut buffer = Vec::new();
        let metadata = transformer
            .transform_streaming(
                &doc,
                Uuid::nil(),
                &mut buffer,
                &ProgressSender::null(Uuid::nil(), "transform"),
            )
            .unwrap();

        assert_eq!(metadata.node_count, in_memory.metadata.node_count);
        assert_eq!(
            metadata.relationship_count,
            in_memory.metadata.relationship_count
        );

        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(
            parsed["nodes"].as_array().unwrap().len(),
            metadata.node_count
        );
        assert_eq!(
            parsed["relationships"].as_array().unwrap().len(),
            metadata.relationship_count
        );
    }
}
