//! knowgraph-storage: graph-store access, batched loading, and backups.
//!
//! The [`domain::GraphStore`] port abstracts the store's transactional
//! interface; `infrastructure` provides the neo4rs adapter and an in-memory
//! twin for tests. [`loader::BatchUploader`] applies tuple sets with
//! adaptive batching, and [`backup::BackupService`] snapshots the store's
//! data directory before destructive loads.

pub mod backup;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod loader;
pub mod lock;

pub use backup::{BackupConfig, BackupService, BackupStatistics};
pub use domain::{
    default_constraints, BackupRecord, BatchTiming, ConstraintDef, GraphStore, NoopAdmin,
    SkippedRelationship, StoreAdmin, UploadOptions, UploadReport,
};
pub use error::{Result, StorageError};
pub use infrastructure::{InMemoryGraphStore, Neo4jConfig, Neo4jGraphStore};
pub use loader::{write_report, BatchUploader};
pub use lock::store_lock;
