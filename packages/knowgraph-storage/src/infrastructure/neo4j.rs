//! neo4rs-backed graph store adapter.
//!
//! Statements are the same parameterized upserts the cypher script carries;
//! each batch runs inside one explicit transaction. Relationship endpoint
//! presence is pre-checked with a read query so missing endpoints degrade to
//! skips instead of failed batches.

use crate::domain::{ConstraintDef, GraphStore};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use knowgraph_transform::cypher::{node_statement, relationship_statement};
use knowgraph_transform::{NodeTuple, PropertyValue, RelationshipTuple};
use neo4rs::{query, BoltList, BoltType, Graph};
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    /// Logical name used for the process-wide loader mutex.
    pub logical_name: String,
}

impl Neo4jConfig {
    /// Read `GRAPH_STORE_URI` / `GRAPH_STORE_USER` / `GRAPH_STORE_PASSWORD`
    /// / `GRAPH_STORE_DATABASE`. Missing URI is an error; the rest default.
    pub fn from_env() -> Result<Self> {
        let uri = std::env::var("GRAPH_STORE_URI")
            .map_err(|_| StorageError::Unavailable("GRAPH_STORE_URI is not set".into()))?;
        Ok(Self {
            uri,
            user: std::env::var("GRAPH_STORE_USER").unwrap_or_else(|_| "neo4j".into()),
            password: std::env::var("GRAPH_STORE_PASSWORD").unwrap_or_default(),
            database: std::env::var("GRAPH_STORE_DATABASE").ok(),
            logical_name: "neo4j".into(),
        })
    }
}

pub struct Neo4jGraphStore {
    graph: Graph,
    logical_name: String,
}

impl Neo4jGraphStore {
    pub async fn connect(config: Neo4jConfig) -> Result<Self> {
        let mut builder = neo4rs::ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str());
        if let Some(database) = &config.database {
            builder = builder.db(database.as_str());
        }
        let graph_config = builder
            .build()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let graph = Graph::connect(graph_config)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        info!(uri = %config.uri, "connected to graph store");
        Ok(Self {
            graph,
            logical_name: config.logical_name,
        })
    }

    async fn count(&self, text: &str) -> Result<u64> {
        let mut stream = self
            .graph
            .execute(query(text))
            .await
            .map_err(|e| StorageError::classify(e.to_string()))?;
        let row = stream
            .next()
            .await
            .map_err(|e| StorageError::classify(e.to_string()))?
            .ok_or_else(|| StorageError::Permanent("count query returned no rows".into()))?;
        let count: i64 = row
            .get("c")
            .map_err(|e| StorageError::Permanent(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    /// Which of the given keys exist in the store right now.
    async fn existing_keys(&self, keys: &[&str]) -> Result<HashSet<String>> {
        let key_list = BoltType::List(BoltList {
            value: keys
                .iter()
                .map(|k| BoltType::from(k.to_string()))
                .collect(),
        });
        let mut stream = self
            .graph
            .execute(
                query("MATCH (n) WHERE n.unique_key IN $keys RETURN n.unique_key AS k")
                    .param("keys", key_list),
            )
            .await
            .map_err(|e| StorageError::classify(e.to_string()))?;

        let mut found = HashSet::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| StorageError::classify(e.to_string()))?
        {
            if let Ok(key) = row.get::<String>("k") {
                found.insert(key);
            }
        }
        Ok(found)
    }
}

fn to_bolt(value: &PropertyValue) -> BoltType {
    match value {
        // Absent values upsert as empty strings so match-properties stay
        // comparable across loads.
        PropertyValue::Null => BoltType::from(String::new()),
        PropertyValue::Bool(b) => BoltType::from(*b),
        PropertyValue::Int(i) => BoltType::from(*i),
        PropertyValue::Float(f) => BoltType::from(*f),
        PropertyValue::String(s) => BoltType::from(s.clone()),
        PropertyValue::List(items) => BoltType::List(BoltList {
            value: items.iter().map(to_bolt).collect(),
        }),
    }
}

fn build_query(text: &str, params: &knowgraph_transform::Properties) -> neo4rs::Query {
    let mut q = query(text.trim_end_matches(';'));
    for (key, value) in params {
        q = q.param(key, to_bolt(value));
    }
    q
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    fn logical_name(&self) -> &str {
        &self.logical_name
    }

    async fn ping(&self) -> Result<()> {
        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn ensure_constraints(&self, constraints: &[ConstraintDef]) -> Result<()> {
        for constraint in constraints {
            let requirement = if constraint.properties.len() == 1 {
                format!("n.{} IS UNIQUE", constraint.properties[0])
            } else {
                let props: Vec<String> = constraint
                    .properties
                    .iter()
                    .map(|p| format!("n.{p}"))
                    .collect();
                format!("({}) IS UNIQUE", props.join(", "))
            };
            let text = format!(
                "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{}) REQUIRE {}",
                constraint.label, requirement
            );
            self.graph
                .run(query(&text))
                .await
                .map_err(|e| StorageError::classify(e.to_string()))?;
            debug!(label = %constraint.label, "constraint ensured");
        }
        Ok(())
    }

    async fn upsert_nodes(&self, nodes: &[NodeTuple]) -> Result<()> {
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| StorageError::classify(e.to_string()))?;

        let queries: Vec<neo4rs::Query> = nodes
            .iter()
            .map(|node| {
                let (text, params) = node_statement(node);
                build_query(&text, &params)
            })
            .collect();

        txn.run_queries(queries)
            .await
            .map_err(|e| StorageError::classify(e.to_string()))?;
        txn.commit()
            .await
            .map_err(|e| StorageError::classify(e.to_string()))
    }

    async fn upsert_relationships(
        &self,
        relationships: &[RelationshipTuple],
    ) -> Result<Vec<usize>> {
        // Endpoint presence check outside the transaction: all node batches
        // committed before any relationship batch starts.
        let mut keys: Vec<&str> = Vec::new();
        for rel in relationships {
            keys.push(&rel.source_key);
            keys.push(&rel.target_key);
        }
        keys.sort_unstable();
        keys.dedup();
        let existing = self.existing_keys(&keys).await?;

        let mut skipped = Vec::new();
        let mut queries = Vec::new();
        for (i, rel) in relationships.iter().enumerate() {
            if !existing.contains(&rel.source_key) || !existing.contains(&rel.target_key) {
                skipped.push(i);
                continue;
            }
            let (text, params) = relationship_statement(rel);
            queries.push(build_query(&text, &params));
        }

        if !queries.is_empty() {
            let mut txn = self
                .graph
                .start_txn()
                .await
                .map_err(|e| StorageError::classify(e.to_string()))?;
            txn.run_queries(queries)
                .await
                .map_err(|e| StorageError::classify(e.to_string()))?;
            txn.commit()
                .await
                .map_err(|e| StorageError::classify(e.to_string()))?;
        }
        Ok(skipped)
    }

    async fn clear(&self) -> Result<()> {
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| StorageError::classify(e.to_string()))?;
        txn.run_queries(vec![query("MATCH (n) DETACH DELETE n")])
            .await
            .map_err(|e| StorageError::classify(e.to_string()))?;
        txn.commit()
            .await
            .map_err(|e| StorageError::classify(e.to_string()))
    }

    async fn node_count(&self) -> Result<u64> {
        self.count("MATCH (n) RETURN count(n) AS c").await
    }

    async fn relationship_count(&self) -> Result<u64> {
        self.count("MATCH ()-[r]->() RETURN count(r) AS c").await
    }
}
