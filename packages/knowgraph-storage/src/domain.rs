//! Domain layer: the graph-store port and the records the loader and backup
//! services exchange.
//!
//! # Port traits
//!
//! - [`GraphStore`]: transactional access to the store. Each `upsert_*` call
//!   is one transaction; a batch either commits whole or not at all.
//! - [`StoreAdmin`]: the administrative surface backups use to pause or stop
//!   the store around filesystem snapshots.
//!
//! Adapters live in `infrastructure`: a neo4rs-backed store for production
//! and an in-memory store for tests.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use knowgraph_transform::{NodeTuple, RelationshipTuple};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Uniqueness constraint over one label's property set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDef {
    pub label: String,
    pub properties: Vec<String>,
}

impl ConstraintDef {
    pub fn new(label: &str, properties: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            properties: properties.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// The uniqueness constraints every load ensures before writing.
pub fn default_constraints() -> Vec<ConstraintDef> {
    vec![
        ConstraintDef::new("Module", &["path"]),
        ConstraintDef::new("Class", &["name", "module_path"]),
        ConstraintDef::new("Function", &["name", "module_path"]),
        ConstraintDef::new("Method", &["name", "class_name", "module_path"]),
        ConstraintDef::new("Variable", &["name", "scope", "module_path"]),
    ]
}

/// Transactional access to the graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Logical store name; the process-wide loader mutex is keyed on it.
    fn logical_name(&self) -> &str;

    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<()>;

    /// Idempotently create uniqueness constraints.
    async fn ensure_constraints(&self, constraints: &[ConstraintDef]) -> Result<()>;

    /// Upsert a batch of nodes in a single transaction.
    async fn upsert_nodes(&self, nodes: &[NodeTuple]) -> Result<()>;

    /// Upsert a batch of relationships in a single transaction. Returns the
    /// in-batch indexes whose endpoints were not found; those are skipped,
    /// never a batch failure.
    async fn upsert_relationships(&self, relationships: &[RelationshipTuple])
        -> Result<Vec<usize>>;

    /// Remove every node and relationship, in one transaction.
    async fn clear(&self) -> Result<()>;

    async fn node_count(&self) -> Result<u64>;

    async fn relationship_count(&self) -> Result<u64>;
}

/// Administrative control used by the backup service. Pause/resume bracket
/// archive creation; stop/start bracket a restore.
#[async_trait]
pub trait StoreAdmin: Send + Sync {
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
}

/// Admin adapter for deployments with no controllable store process. Every
/// operation succeeds after logging that it did nothing.
pub struct NoopAdmin;

#[async_trait]
impl StoreAdmin for NoopAdmin {
    async fn pause(&self) -> Result<()> {
        warn!("store admin: pause is a no-op for this deployment");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        warn!("store admin: stop is a no-op for this deployment");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }
}

/// One recorded snapshot of the store's data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    #[serde(default)]
    pub description: Option<String>,
}

impl BackupRecord {
    pub fn exists(&self) -> bool {
        self.archive_path.exists()
    }
}

/// Loader options, defaults per the upload contract.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub clear_before_load: bool,
    pub batch_size: usize,
    pub validate_first: bool,
    pub create_constraints: bool,
    /// AIMD floor when the store pushes back.
    pub min_batch_size: usize,
    pub max_attempts: usize,
    /// Per-batch transaction budget; exceeding it counts as a transient
    /// failure.
    pub batch_timeout: std::time::Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            clear_before_load: false,
            batch_size: 1000,
            validate_first: true,
            create_constraints: true,
            min_batch_size: 100,
            max_attempts: 5,
            batch_timeout: std::time::Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRelationship {
    pub source_key: String,
    pub target_key: String,
    pub rel_type: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTiming {
    pub index: usize,
    pub kind: String,
    pub items: usize,
    pub duration_ms: u64,
    pub attempts: usize,
}

/// The `upload_result_<job_id>.json` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    pub job_id: uuid::Uuid,
    pub success: bool,
    pub nodes_uploaded: usize,
    pub relationships_uploaded: usize,
    pub relationships_skipped: Vec<SkippedRelationship>,
    pub batches: Vec<BatchTiming>,
    pub duration_ms: u64,
    pub cleared_before_load: bool,
    pub node_count_after: u64,
    pub relationship_count_after: u64,
    /// sha256 of the tuples document the upload was driven by.
    pub tuples_checksum: String,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints_cover_all_labels() {
        let constraints = default_constraints();
        let labels: Vec<&str> = constraints.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Module", "Class", "Function", "Method", "Variable"]
        );
    }

    #[test]
    fn test_upload_options_defaults() {
        let options = UploadOptions::default();
        assert_eq!(options.batch_size, 1000);
        assert!(options.validate_first);
        assert!(options.create_constraints);
        assert!(!options.clear_before_load);
        assert_eq!(options.min_batch_size, 100);
    }

    #[test]
    fn test_backup_record_roundtrip() {
        let record = BackupRecord {
            job_id: "job-1".into(),
            created_at: Utc::now(),
            archive_path: PathBuf::from("/backups/backup_job-1.tar.gz"),
            size_bytes: 42,
            description: Some("before clear".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: BackupRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
