//! Store adapters behind the [`crate::domain::GraphStore`] port.

pub mod memory;
pub mod neo4j;

pub use memory::InMemoryGraphStore;
pub use neo4j::{Neo4jConfig, Neo4jGraphStore};
