//! Graph tuples: the transformer's output model.
//!
//! Properties are `BTreeMap`-backed so serialized key order is stable; the
//! determinism contract requires byte-equal output for identical input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A graph property value. Serializes untagged, so JSON stays plain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<Option<String>> for PropertyValue {
    fn from(v: Option<String>) -> Self {
        v.map(PropertyValue::String).unwrap_or(PropertyValue::Null)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<usize> for PropertyValue {
    fn from(v: usize) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::List(v.into_iter().map(PropertyValue::String).collect())
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// One graph node to upsert. `unique_key` is the authoritative identity;
/// `match_properties` name the property subset the upload layer matches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTuple {
    pub label: String,
    pub unique_key: String,
    pub properties: Properties,
    pub match_properties: Vec<String>,
}

impl NodeTuple {
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self.properties.get("placeholder"),
            Some(PropertyValue::Bool(true))
        )
    }
}

/// One relationship to upsert. Endpoint keys reference `NodeTuple::unique_key`
/// values within the same set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTuple {
    pub source_key: String,
    pub target_key: String,
    pub rel_type: String,
    pub source_label: String,
    pub target_label: String,
    pub properties: Properties,
}

/// Deterministic metadata block. Deliberately carries no timestamp: two
/// transformer invocations over the same extraction must be byte-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleMetadata {
    pub job_id: Uuid,
    pub node_count: usize,
    pub relationship_count: usize,
    pub modules_processed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleSet {
    pub metadata: TupleMetadata,
    pub nodes: Vec<NodeTuple>,
    pub relationships: Vec<RelationshipTuple>,
}

impl TupleSet {
    pub fn empty(job_id: Uuid) -> Self {
        Self {
            metadata: TupleMetadata {
                job_id,
                node_count: 0,
                relationship_count: 0,
                modules_processed: 0,
            },
            nodes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn to_canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
