//! Batched transactional upload of a tuple set.
//!
//! Sequence: validate → snapshot + clear → constraints → node batches →
//! relationship batches → report. Nodes all commit before the first
//! relationship batch. Batch size adapts to backpressure: halve on a
//! transient rejection (floor `min_batch_size`), grow back additively by
//! 100 per successful batch. Transient failures retry with exponential
//! backoff (100 ms, factor 2, cap 5 s, max 5 attempts); permanent failures
//! abort the load.

use crate::backup::BackupService;
use crate::domain::{
    default_constraints, BatchTiming, GraphStore, SkippedRelationship, UploadOptions,
    UploadReport,
};
use crate::error::{Result, StorageError};
use crate::lock::store_lock;
use knowgraph_ir::progress::ProgressSender;
use knowgraph_transform::{
    CypherGenerator, RelationshipTuple, ScriptValidator, TupleSet, ValidatorConfig,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const ADDITIVE_INCREASE: usize = 100;

fn backoff_delay(attempt: usize) -> Duration {
    let factor = 1u32 << (attempt.saturating_sub(1)).min(16) as u32;
    BACKOFF_INITIAL.saturating_mul(factor).min(BACKOFF_CAP)
}

/// Additive-increase / multiplicative-decrease batch sizing.
struct AimdBatchSize {
    current: usize,
    floor: usize,
    ceiling: usize,
}

impl AimdBatchSize {
    fn new(options: &UploadOptions) -> Self {
        let ceiling = options.batch_size.max(1);
        Self {
            current: ceiling,
            floor: options.min_batch_size.clamp(1, ceiling),
            ceiling,
        }
    }

    fn current(&self) -> usize {
        self.current
    }

    fn on_success(&mut self) {
        self.current = (self.current + ADDITIVE_INCREASE).min(self.ceiling);
    }

    fn on_backpressure(&mut self) {
        self.current = (self.current / 2).max(self.floor);
    }
}

pub struct BatchUploader {
    store: Arc<dyn GraphStore>,
    backup: Option<Arc<BackupService>>,
}

impl BatchUploader {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            backup: None,
        }
    }

    /// Attach a backup service; a clear-before-load upload then snapshots
    /// the store before clearing it.
    pub fn with_backup(mut self, backup: Arc<BackupService>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Apply a tuple set to the store. Returns the upload report on success.
    pub async fn upload(
        &self,
        tuples: &TupleSet,
        job_id: uuid::Uuid,
        options: &UploadOptions,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<UploadReport> {
        let started = Instant::now();
        let total_items = (tuples.nodes.len() + tuples.relationships.len()) as u64;
        progress.started(
            total_items,
            format!(
                "uploading {} nodes, {} relationships",
                tuples.nodes.len(),
                tuples.relationships.len()
            ),
        );

        let checksum = {
            let bytes = tuples.to_canonical_json()?;
            let digest = Sha256::digest(&bytes);
            format!("{digest:x}")
        };

        if options.validate_first {
            let script = CypherGenerator::generate(tuples);
            let validator = ScriptValidator::new(ValidatorConfig {
                append_only: !options.clear_before_load,
                ..Default::default()
            });
            let report = validator.validate(&script, tuples);
            if !report.is_ok() {
                return Err(StorageError::Validation(report.errors));
            }
        }

        if options.clear_before_load {
            if let Some(backup) = &self.backup {
                backup
                    .create_backup(&job_id.to_string(), Some("pre-clear snapshot".into()))
                    .await?;
            }
        }

        // One loader per store across the whole process.
        let lock = store_lock(self.store.logical_name());
        let _guard = lock.lock().await;

        if options.clear_before_load {
            self.store.clear().await?;
            info!("store cleared before load");
        }

        if options.create_constraints {
            self.store
                .ensure_constraints(&default_constraints())
                .await?;
        }

        let mut aimd = AimdBatchSize::new(options);
        let mut timings: Vec<BatchTiming> = Vec::new();
        let mut uploaded_items = 0u64;

        // Node batches first, all of them.
        let nodes_uploaded = self
            .run_batches(
                "nodes",
                tuples.nodes.len(),
                options,
                &mut aimd,
                &mut timings,
                cancel,
                progress,
                &mut uploaded_items,
                total_items,
                |range| {
                    let batch = &tuples.nodes[range];
                    async move { self.store.upsert_nodes(batch).await.map(|_| Vec::new()) }
                },
            )
            .await?;

        // Relationships whose endpoints are not in the tuple set are skipped
        // up front; the store reports any that are still missing at commit
        // time.
        let node_keys: HashSet<&str> = tuples
            .nodes
            .iter()
            .map(|n| n.unique_key.as_str())
            .collect();
        let mut skipped: Vec<SkippedRelationship> = Vec::new();
        let uploadable: Vec<&RelationshipTuple> = tuples
            .relationships
            .iter()
            .filter(|rel| {
                let present = node_keys.contains(rel.source_key.as_str())
                    && node_keys.contains(rel.target_key.as_str());
                if !present {
                    skipped.push(skip_record(rel));
                }
                present
            })
            .collect();

        let store_skipped = Arc::new(parking_lot::Mutex::new(Vec::<SkippedRelationship>::new()));
        let relationships_uploaded = self
            .run_batches(
                "relationships",
                uploadable.len(),
                options,
                &mut aimd,
                &mut timings,
                cancel,
                progress,
                &mut uploaded_items,
                total_items,
                |range| {
                    let batch: Vec<RelationshipTuple> =
                        uploadable[range].iter().map(|r| (*r).clone()).collect();
                    let store = self.store.clone();
                    let sink = store_skipped.clone();
                    async move {
                        let skipped_idx = store.upsert_relationships(&batch).await?;
                        let mut sink = sink.lock();
                        for i in &skipped_idx {
                            sink.push(skip_record(&batch[*i]));
                        }
                        Ok(skipped_idx)
                    }
                },
            )
            .await?;

        let store_skips = store_skipped.lock().clone();
        let relationships_uploaded = relationships_uploaded - store_skips.len();
        skipped.extend(store_skips);
        for skip in &skipped {
            warn!(
                source = %skip.source_key,
                target = %skip.target_key,
                "relationship skipped: endpoint missing"
            );
        }

        let report = UploadReport {
            job_id,
            success: true,
            nodes_uploaded,
            relationships_uploaded,
            relationships_skipped: skipped,
            batches: timings,
            duration_ms: started.elapsed().as_millis() as u64,
            cleared_before_load: options.clear_before_load,
            node_count_after: self.store.node_count().await?,
            relationship_count_after: self.store.relationship_count().await?,
            tuples_checksum: checksum,
            errors: Vec::new(),
        };

        progress.finished(
            total_items,
            format!(
                "uploaded {} nodes, {} relationships ({} skipped)",
                report.nodes_uploaded,
                report.relationships_uploaded,
                report.relationships_skipped.len()
            ),
            serde_json::json!({
                "nodes": report.nodes_uploaded,
                "relationships": report.relationships_uploaded,
                "skipped": report.relationships_skipped.len(),
            }),
        );
        Ok(report)
    }

    /// Drive one category (nodes or relationships) through the batch loop.
    /// Returns the number of items submitted in committed batches.
    #[allow(clippy::too_many_arguments)]
    async fn run_batches<'a, F, Fut>(
        &'a self,
        kind: &str,
        total: usize,
        options: &UploadOptions,
        aimd: &mut AimdBatchSize,
        timings: &mut Vec<BatchTiming>,
        cancel: &CancellationToken,
        progress: &ProgressSender,
        uploaded_items: &mut u64,
        total_items: u64,
        mut apply: F,
    ) -> Result<usize>
    where
        F: FnMut(std::ops::Range<usize>) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<usize>>> + 'a,
    {
        let mut position = 0usize;
        let mut attempts_here = 0usize;
        let mut committed = 0usize;
        let mut batch_index = 0usize;

        while position < total {
            // Cancellation honored between batches; an in-flight transaction
            // always finishes.
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }

            let size = aimd.current().min(total - position);
            attempts_here += 1;
            let batch_started = Instant::now();

            let outcome = match tokio::time::timeout(
                options.batch_timeout,
                apply(position..position + size),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(StorageError::Transient(format!(
                    "{kind} batch transaction timed out after {:?}",
                    options.batch_timeout
                ))),
            };

            match outcome {
                Ok(_skipped) => {
                    timings.push(BatchTiming {
                        index: batch_index,
                        kind: kind.to_string(),
                        items: size,
                        duration_ms: batch_started.elapsed().as_millis() as u64,
                        attempts: attempts_here,
                    });
                    position += size;
                    committed += size;
                    batch_index += 1;
                    attempts_here = 0;
                    aimd.on_success();

                    *uploaded_items += size as u64;
                    progress.step_completed(
                        *uploaded_items,
                        total_items,
                        format!("{kind}: {position}/{total}"),
                    );
                }
                Err(e) if e.is_transient() && attempts_here < options.max_attempts => {
                    warn!(
                        kind,
                        attempt = attempts_here,
                        batch = size,
                        error = %e,
                        "transient batch failure, backing off"
                    );
                    tokio::time::sleep(backoff_delay(attempts_here)).await;
                    aimd.on_backpressure();
                }
                Err(e) => return Err(e),
            }
        }
        Ok(committed)
    }
}

fn skip_record(rel: &RelationshipTuple) -> SkippedRelationship {
    SkippedRelationship {
        source_key: rel.source_key.clone(),
        target_key: rel.target_key.clone(),
        rel_type: rel.rel_type.clone(),
        reason: "endpoint_missing".to_string(),
    }
}

/// Atomically write an upload report artifact.
pub fn write_report(report: &UploadReport, path: &Path) -> Result<()> {
    use std::io::Write;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&serde_json::to_vec_pretty(report)?)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| StorageError::Permanent(format!("could not write report: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryGraphStore;
    use knowgraph_ir::ir::{
        ExtractionDocument, ExtractionMetadata, ExtractionStatistics,
    };
    use knowgraph_ir::PythonParser;
    use knowgraph_transform::Transformer;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn tuples_for(sources: &[(&str, &str)]) -> TupleSet {
        let parser = PythonParser::new();
        let mut modules = BTreeMap::new();
        for (path, source) in sources {
            modules.insert(path.to_string(), parser.parse_module(path, source, "fp"));
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

    fn progress() -> ProgressSender {
        ProgressSender::null(Uuid::nil(), "load")
    }

    #[tokio::test]
    async fn test_tiny_upload_counts() {
        let tuples = tuples_for(&[("a.py", "x = 1\n")]);
        let store = Arc::new(InMemoryGraphStore::new("load-1"));
        let uploader = BatchUploader::new(store.clone());

        let report = uploader
            .upload(
                &tuples,
                Uuid::new_v4(),
                &UploadOptions::default(),
                &progress(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.nodes_uploaded, 2);
        assert_eq!(report.relationships_uploaded, 1);
        assert_eq!(report.node_count_after, 2);
        assert_eq!(report.relationship_count_after, 1);
        assert!(report.relationships_skipped.is_empty());
        assert_eq!(report.tuples_checksum.len(), 64);
    }

    #[tokio::test]
    async fn test_idempotent_upload() {
        let tuples = tuples_for(&[(
            "pkg/a.py",
            "from .b import f\nimport os\n",
        ), (
            "pkg/b.py",
            "class B:\n    def m(self):\n        pass\n",
        )]);
        let store = Arc::new(InMemoryGraphStore::new("load-2"));
        let uploader = BatchUploader::new(store.clone());
        let options = UploadOptions::default();

        let first = uploader
            .upload(&tuples, Uuid::new_v4(), &options, &progress(), &CancellationToken::new())
            .await
            .unwrap();
        let second = uploader
            .upload(&tuples, Uuid::new_v4(), &options, &progress(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.node_count_after, second.node_count_after);
        assert_eq!(
            first.relationship_count_after,
            second.relationship_count_after
        );
    }

    #[tokio::test]
    async fn test_backpressure_halves_batch_and_completes() {
        // Store rejects transactions over 500 items; batch starts at 1000.
        let mut sources = Vec::new();
        let mut owned = Vec::new();
        for i in 0..700 {
            owned.push((format!("m{i:04}.py"), format!("value_{i} = {i}\n")));
        }
        for (path, source) in &owned {
            sources.push((path.as_str(), source.as_str()));
        }
        let tuples = tuples_for(&sources);
        assert!(tuples.nodes.len() > 1000);

        let store = Arc::new(
            InMemoryGraphStore::new("load-3").with_max_transaction_items(500),
        );
        let uploader = BatchUploader::new(store.clone());

        let report = uploader
            .upload(
                &tuples,
                Uuid::new_v4(),
                &UploadOptions::default(),
                &progress(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.nodes_uploaded, tuples.nodes.len());
        assert_eq!(
            report.relationships_uploaded,
            tuples.relationships.len()
        );
        assert_eq!(report.node_count_after as usize, tuples.nodes.len());
        // At least one batch needed more than one attempt.
        assert!(report.batches.iter().any(|b| b.attempts > 1));
        // And every committed batch fit under the store's cap.
        assert!(report
            .batches
            .iter()
            .all(|b| b.items <= 500));
    }

    #[tokio::test]
    async fn test_permanent_failure_aborts() {
        let tuples = tuples_for(&[("a.py", "x = 1\ny = 2\n")]);
        let store = Arc::new(InMemoryGraphStore::new("load-4").with_fail_after_commits(0));
        let uploader = BatchUploader::new(store);

        let err = uploader
            .upload(
                &tuples,
                Uuid::new_v4(),
                &UploadOptions::default(),
                &progress(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_empty_tuples_noop() {
        let store = Arc::new(InMemoryGraphStore::new("load-5"));
        let uploader = BatchUploader::new(store.clone());
        let report = uploader
            .upload(
                &TupleSet::empty(Uuid::nil()),
                Uuid::new_v4(),
                &UploadOptions::default(),
                &progress(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.nodes_uploaded, 0);
        assert_eq!(report.relationships_uploaded, 0);
        assert!(report.batches.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_batches() {
        let tuples = tuples_for(&[("a.py", "x = 1\n")]);
        let store = Arc::new(InMemoryGraphStore::new("load-6"));
        let uploader = BatchUploader::new(store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = uploader
            .upload(
                &tuples,
                Uuid::new_v4(),
                &UploadOptions::default(),
                &progress(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }

    #[tokio::test]
    async fn test_constraints_created() {
        let tuples = tuples_for(&[("a.py", "x = 1\n")]);
        let store = Arc::new(InMemoryGraphStore::new("load-7"));
        BatchUploader::new(store.clone())
            .upload(
                &tuples,
                Uuid::new_v4(),
                &UploadOptions::default(),
                &progress(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(store.constraints().len(), 5);
    }

    #[tokio::test]
    async fn test_clear_before_load_snapshots_then_clears() {
        use crate::backup::{BackupConfig, BackupService};
        use crate::domain::NoopAdmin;
        use knowgraph_transform::{NodeTuple, Properties};

        let backup_dir = tempfile::TempDir::new().unwrap();
        let data_parent = tempfile::TempDir::new().unwrap();
        let data_dir = data_parent.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join("store.db"), b"previous state").unwrap();

        let store = Arc::new(InMemoryGraphStore::new("load-9"));
        store
            .upsert_nodes(&[NodeTuple {
                label: "Module".into(),
                unique_key: "module:stale.py".into(),
                properties: Properties::new(),
                match_properties: vec![],
            }])
            .await
            .unwrap();

        let backup = Arc::new(BackupService::new(
            BackupConfig {
                backup_dir: backup_dir.path().to_path_buf(),
                data_dir,
                store_name: "load-9".into(),
            },
            Arc::new(NoopAdmin),
        ));

        let tuples = tuples_for(&[("a.py", "x = 1\n")]);
        let job_id = Uuid::new_v4();
        let report = BatchUploader::new(store.clone())
            .with_backup(backup.clone())
            .upload(
                &tuples,
                job_id,
                &UploadOptions {
                    clear_before_load: true,
                    ..Default::default()
                },
                &progress(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(report.cleared_before_load);
        assert!(store.node("module:stale.py").is_none());
        assert_eq!(report.node_count_after, 2);
        assert!(backup
            .find_backup(&job_id.to_string())
            .unwrap()
            .is_some_and(|r| r.exists()));
    }

    #[tokio::test]
    async fn test_write_report_atomic() {
        let tuples = tuples_for(&[("a.py", "x = 1\n")]);
        let store = Arc::new(InMemoryGraphStore::new("load-8"));
        let report = BatchUploader::new(store)
            .upload(
                &tuples,
                Uuid::new_v4(),
                &UploadOptions::default(),
                &progress(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("upload_result_test.json");
        write_report(&report, &path).unwrap();
        let back: UploadReport =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(report, back);
    }
}
