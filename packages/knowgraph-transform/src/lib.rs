//! knowgraph-transform: extraction document → graph tuples → cypher script.
//!
//! Deterministic by contract: the same extraction input yields byte-identical
//! tuples and parameterized script output. The validator gate-keeps every
//! script before the loader may touch the store.

pub mod cypher;
pub mod error;
pub mod transformer;
pub mod tuples;
pub mod validator;

pub use cypher::CypherGenerator;
pub use error::{Result, TransformError};
pub use transformer::{Transformer, TransformerConfig};
pub use tuples::{
    NodeTuple, Properties, PropertyValue, RelationshipTuple, TupleMetadata, TupleSet,
};
pub use validator::{ScriptValidator, ValidationReport, ValidatorConfig};
