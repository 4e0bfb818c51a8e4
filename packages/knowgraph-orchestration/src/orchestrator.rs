//! The analysis orchestrator: job lifecycle, phase sequencing, status
//! fan-out, and the artifact/download surface.
//!
//! Phases run inside the job's driver task and communicate only through
//! progress events and their output artifacts. Retryable phase failures are
//! re-run a bounded number of times with exponential backoff; every phase
//! runs under its configured timeout and the job's cancellation token.

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::OrchestratorConfig;
use crate::error::{
    classify_ir_error, classify_storage_error, ErrorKind, JobError, OrchestratorError, Result,
};
use crate::job::{Job, JobPhase};
use crate::registry::{JobRegistry, JobUpdate};
use crate::status::StatusChannel;
use dashmap::DashMap;
use knowgraph_ir::extract::{ExtractionEngine, ExtractorConfig};
use knowgraph_ir::ir::ExtractionDocument;
use knowgraph_ir::progress::{ProgressEvent, ProgressSender};
use knowgraph_ir::{CacheConfig, ParseCache};
use knowgraph_storage::{BackupService, BatchUploader, GraphStore, UploadOptions};
use knowgraph_transform::{
    CypherGenerator, ScriptValidator, Transformer, TupleSet, ValidatorConfig,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const RETRY_BACKOFF_INITIAL: Duration = Duration::from_millis(500);

/// Status snapshot returned by `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub phase: JobPhase,
    pub progress_percent: u8,
    pub message: String,
    pub artifacts: Vec<ArtifactKind>,
    pub error: Option<JobError>,
}

/// Results summary for terminal jobs.
#[derive(Debug, Clone, Serialize)]
pub struct JobResults {
    pub job_id: Uuid,
    pub phase: JobPhase,
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
    pub message: String,
    pub error: Option<JobError>,
}

struct Inner {
    config: OrchestratorConfig,
    registry: JobRegistry,
    status: StatusChannel,
    artifacts: ArtifactStore,
    store: Arc<dyn GraphStore>,
    backup: Option<Arc<BackupService>>,
    cache: Option<Arc<ParseCache>>,
    cancel_tokens: DashMap<Uuid, CancellationToken>,
}

#[derive(Clone)]
pub struct AnalysisOrchestrator {
    inner: Arc<Inner>,
}

impl AnalysisOrchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn GraphStore>) -> Result<Self> {
        Self::with_backup(config, store, None)
    }

    pub fn with_backup(
        config: OrchestratorConfig,
        store: Arc<dyn GraphStore>,
        backup: Option<Arc<BackupService>>,
    ) -> Result<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => Some(Arc::new(
                ParseCache::open(CacheConfig::new(dir))
                    .map_err(|e| OrchestratorError::Config(format!("cache: {e}")))?,
            )),
            None => None,
        };
        let artifacts = ArtifactStore::new(&config.artifact_dir);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry: JobRegistry::spawn(),
                status: StatusChannel::new(),
                artifacts,
                store,
                backup,
                cache,
                cancel_tokens: DashMap::new(),
            }),
        })
    }

    /// Start one analysis job; returns immediately with the job id.
    pub async fn start_analysis(&self, source_path: PathBuf) -> Result<JobStatus> {
        if !source_path.exists() {
            return Err(OrchestratorError::InvalidPath(
                source_path.display().to_string(),
            ));
        }
        if !source_path.is_dir() {
            return Err(OrchestratorError::NotADirectory(
                source_path.display().to_string(),
            ));
        }

        let job = Job::new(source_path.clone());
        let job_id = job.job_id;
        let status = snapshot(&job);
        self.inner.registry.insert(job).await?;

        let cancel = CancellationToken::new();
        self.inner.cancel_tokens.insert(job_id, cancel.clone());

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run_pipeline(job_id, source_path, cancel).await;
        });

        info!(%job_id, "analysis started");
        Ok(status)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatus> {
        Ok(snapshot(&self.inner.registry.get(job_id).await?))
    }

    /// Artifact map plus summary; terminal jobs only.
    pub async fn get_results(&self, job_id: Uuid) -> Result<JobResults> {
        let job = self.inner.registry.get(job_id).await?;
        if !job.is_terminal() {
            return Err(OrchestratorError::JobNotTerminal(job_id));
        }
        Ok(JobResults {
            job_id,
            phase: job.phase,
            artifacts: job.artifacts,
            message: job.message,
            error: job.error,
        })
    }

    /// Artifact bytes plus a suggested filename. The filename is verified
    /// to embed the requesting job's id.
    pub async fn download_artifact(
        &self,
        job_id: Uuid,
        kind: &str,
    ) -> Result<(Vec<u8>, String)> {
        let kind = ArtifactKind::parse(kind)?;
        let job = self.inner.registry.get(job_id).await?;
        let path = job
            .artifacts
            .get(&kind)
            .ok_or(OrchestratorError::ArtifactMissing {
                job_id,
                kind: kind.as_str().to_string(),
            })?;
        self.inner.artifacts.read(job_id, kind, path)
    }

    /// Best-effort cancel, honored at the next phase checkpoint.
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let job = self.inner.registry.get(job_id).await?;
        if job.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(job_id));
        }
        if let Some(token) = self.inner.cancel_tokens.get(&job_id) {
            token.cancel();
        }
        info!(%job_id, "cancellation requested");
        Ok(())
    }

    /// Server-pushed progress events for one job.
    pub async fn subscribe_progress(
        &self,
        job_id: Uuid,
    ) -> Result<broadcast::Receiver<ProgressEvent>> {
        self.inner.registry.get(job_id).await?;
        Ok(self.inner.status.subscribe(job_id))
    }

    /// Stream flavor of [`Self::subscribe_progress`], for WebSocket fan-out.
    pub async fn subscribe_progress_stream(
        &self,
        job_id: Uuid,
    ) -> Result<tokio_stream::wrappers::BroadcastStream<ProgressEvent>> {
        let receiver = self.subscribe_progress(job_id).await?;
        Ok(tokio_stream::wrappers::BroadcastStream::new(receiver))
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.inner.registry.list().await
    }

    async fn run_pipeline(&self, job_id: Uuid, source_path: PathBuf, cancel: CancellationToken) {
        let (events, pump) = self.spawn_pump(job_id);
        let outcome = self.drive(job_id, &source_path, &cancel, events).await;

        // Every sender is gone once drive returns; wait for the pump to
        // drain so subscribers see all events before the channel closes.
        let _ = pump.await;

        let update = match outcome {
            Ok(()) => JobUpdate::Advance {
                phase: JobPhase::Completed,
                message: "analysis complete".into(),
            },
            Err(OrchestratorError::Cancelled) => JobUpdate::Cancel {
                reason: "cancelled by request".into(),
            },
            Err(e) => {
                error!(%job_id, error = %e, "job failed");
                JobUpdate::Fail(job_error_from(e))
            }
        };
        if let Err(e) = self.inner.registry.apply(job_id, update).await {
            warn!(%job_id, error = %e, "could not finalize job record");
        }

        self.inner.status.close(job_id);
        self.inner.cancel_tokens.remove(&job_id);
    }

    /// Spawn the event pump: phase events update the job record and fan out
    /// to subscribers. The orchestrator end is an unbounded mpsc, so it is
    /// never dropped.
    fn spawn_pump(
        &self,
        job_id: Uuid,
    ) -> (
        mpsc::UnboundedSender<ProgressEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let percent = if event.total > 0 {
                    ((event.current * 100) / event.total).min(100) as u8
                } else {
                    0
                };
                let _ = orchestrator
                    .inner
                    .registry
                    .apply(
                        job_id,
                        JobUpdate::Progress {
                            percent,
                            message: event.message.clone(),
                        },
                    )
                    .await;
                orchestrator.inner.status.publish(event);
            }
        });
        (tx, handle)
    }

    async fn advance(&self, job_id: Uuid, phase: JobPhase, message: &str) -> Result<()> {
        self.inner
            .registry
            .apply(
                job_id,
                JobUpdate::Advance {
                    phase,
                    message: message.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn register_artifact(
        &self,
        job_id: Uuid,
        kind: ArtifactKind,
        path: PathBuf,
    ) -> Result<()> {
        self.inner
            .registry
            .apply(job_id, JobUpdate::Artifact { kind, path })
            .await?;
        Ok(())
    }

    fn extractor_config(&self, source_path: &Path) -> ExtractorConfig {
        let mut config = ExtractorConfig::new(source_path);
        let cfg = &self.inner.config;
        if let Some(cap) = cfg.parse_max_file_bytes {
            config.discovery.max_file_bytes = cap;
        }
        if let Some(min) = cfg.worker_min {
            config.worker_min = min;
        }
        if let Some(max) = cfg.worker_max {
            config.worker_max = max;
        }
        if let Some(cap) = cfg.memory_soft_cap_mb {
            config.memory_soft_cap_mb = cap;
        }
        config
    }

    /// The phase sequence for one job.
    async fn drive(
        &self,
        job_id: Uuid,
        source_path: &Path,
        cancel: &CancellationToken,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<()> {
        let cfg = &self.inner.config;
        self.inner.artifacts.ensure_job_dir(job_id)?;

        // ── extract ──────────────────────────────────────────────────
        self.advance(job_id, JobPhase::Extracting, "extracting source tree")
            .await?;
        let extraction_path = self.inner.artifacts.path_for(job_id, ArtifactKind::Extraction);
        {
            let mut engine = ExtractionEngine::new(self.extractor_config(source_path));
            if let Some(cache) = &self.inner.cache {
                engine = engine.with_cache(cache.clone());
            }
            let progress = ProgressSender::new(job_id, "extract", events.clone());
            self.with_retry(cfg.phase_timeouts.extract, cancel, || {
                let engine = &engine;
                let progress = progress.clone();
                let cancel = cancel.clone();
                let path = extraction_path.clone();
                async move {
                    engine
                        .run(job_id, &path, progress, cancel)
                        .await
                        .map_err(|e| classify_ir_error("extract", e))
                }
            })
            .await?;
        }
        self.register_artifact(job_id, ArtifactKind::Extraction, extraction_path.clone())
            .await?;

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        // ── transform ────────────────────────────────────────────────
        self.advance(job_id, JobPhase::Transforming, "generating graph tuples")
            .await?;
        let tuples_path = self.inner.artifacts.path_for(job_id, ArtifactKind::Tuples);
        let cypher_path = self.inner.artifacts.path_for(job_id, ArtifactKind::Cypher);

        let (tuples, script) = {
            let progress = ProgressSender::new(job_id, "transform", events.clone());
            let extraction_path = extraction_path.clone();
            let tuples_path = tuples_path.clone();
            let transform = tokio::task::spawn_blocking(move || -> Result<(TupleSet, String)> {
                let bytes = std::fs::read(&extraction_path)?;
                let input_size = bytes.len() as u64;
                let document: ExtractionDocument = serde_json::from_slice(&bytes)?;
                drop(bytes);

                let transformer = Transformer::default();
                let tuples = if transformer.should_stream(input_size) {
                    // Stream node tuples straight to the artifact, then load
                    // the (much smaller) tuples document back for the script.
                    let mut tmp = tempfile::NamedTempFile::new_in(
                        tuples_path.parent().unwrap_or_else(|| Path::new(".")),
                    )?;
                    transformer
                        .transform_streaming(&document, job_id, &mut tmp, &progress)
                        .map_err(|e| {
                            OrchestratorError::phase(
                                "transform",
                                ErrorKind::InternalError,
                                e.to_string(),
                            )
                        })?;
                    tmp.flush()?;
                    tmp.persist(&tuples_path).map_err(|e| {
                        OrchestratorError::phase(
                            "transform",
                            ErrorKind::ResourceError,
                            format!("could not write tuples artifact: {e}"),
                        )
                    })?;
                    serde_json::from_slice(&std::fs::read(&tuples_path)?)?
                } else {
                    let tuples = transformer.transform(&document, job_id, &progress);
                    write_atomic(&tuples_path, &tuples.to_canonical_json()?)?;
                    tuples
                };

                let script = CypherGenerator::generate(&tuples);
                Ok((tuples, script))
            });
            tokio::time::timeout(cfg.phase_timeouts.transform, transform)
                .await
                .map_err(|_| phase_timeout("transform"))?
                .map_err(|e| {
                    OrchestratorError::phase("transform", ErrorKind::InternalError, e.to_string())
                })??
        };
        write_atomic(&cypher_path, script.as_bytes())?;
        self.register_artifact(job_id, ArtifactKind::Tuples, tuples_path)
            .await?;
        self.register_artifact(job_id, ArtifactKind::Cypher, cypher_path)
            .await?;

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        // ── validate ─────────────────────────────────────────────────
        self.advance(job_id, JobPhase::Validating, "validating cypher script")
            .await?;
        {
            let progress = ProgressSender::new(job_id, "validate", events.clone());
            progress.started(1, "validating script");
            let validator = ScriptValidator::new(ValidatorConfig {
                append_only: !cfg.clear_before_load,
                ..Default::default()
            });
            let report = validator.validate(&script, &tuples);
            for warning in &report.warnings {
                progress.warning(warning.clone());
            }
            if !report.is_ok() {
                return Err(OrchestratorError::PhaseFailed {
                    phase: "validate".into(),
                    error: JobError::new(
                        ErrorKind::ValidationError,
                        report.errors.join("; "),
                    ),
                });
            }
            progress.finished(
                1,
                format!("{} statements valid", report.statements),
                serde_json::json!({ "statements": report.statements }),
            );
        }

        // ── snapshot (destructive loads only) ────────────────────────
        if cfg.clear_before_load {
            if let Some(backup) = &self.inner.backup {
                self.advance(job_id, JobPhase::Snapshotting, "snapshotting graph store")
                    .await?;
                let progress = ProgressSender::new(job_id, "snapshot", events.clone());
                progress.started(1, "creating backup");
                let record = backup
                    .create_backup(&job_id.to_string(), Some("pre-clear snapshot".into()))
                    .await
                    .map_err(|e| classify_storage_error("snapshot", e))?;
                progress.finished(1, "backup created", serde_json::Value::Null);
                self.register_artifact(job_id, ArtifactKind::Backup, record.archive_path)
                    .await?;
            }
        }

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        // ── load ─────────────────────────────────────────────────────
        self.advance(job_id, JobPhase::Loading, "uploading tuples")
            .await?;
        let report_path = self
            .inner
            .artifacts
            .path_for(job_id, ArtifactKind::UploadResult);
        {
            let uploader = BatchUploader::new(self.inner.store.clone());
            let options = UploadOptions {
                clear_before_load: cfg.clear_before_load,
                // The validating phase already ran over this exact script.
                validate_first: false,
                ..Default::default()
            };
            let progress = ProgressSender::new(job_id, "load", events.clone());
            let report = self
                .with_retry(cfg.phase_timeouts.load, cancel, || {
                    let uploader = &uploader;
                    let tuples = &tuples;
                    let options = options.clone();
                    let progress = progress.clone();
                    let cancel = cancel.clone();
                    async move {
                        uploader
                            .upload(tuples, job_id, &options, &progress, &cancel)
                            .await
                            .map_err(|e| classify_storage_error("load", e))
                    }
                })
                .await?;
            knowgraph_storage::write_report(&report, &report_path)
                .map_err(|e| classify_storage_error("load", e))?;
        }
        self.register_artifact(job_id, ArtifactKind::UploadResult, report_path)
            .await?;

        Ok(())
    }

    /// Run a phase future under its timeout, retrying retryable failures up
    /// to the configured bound with exponential backoff.
    async fn with_retry<T, F, Fut>(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        mut factory: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_retries = self.inner.config.max_phase_retries;
        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            let result = tokio::time::timeout(timeout, factory()).await;
            match result {
                Err(_) => return Err(phase_timeout("phase")),
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(OrchestratorError::Cancelled)) => {
                    return Err(OrchestratorError::Cancelled)
                }
                Ok(Err(e)) => {
                    let retryable = matches!(
                        &e,
                        OrchestratorError::PhaseFailed { error, .. } if error.kind.is_retryable()
                    );
                    if retryable && attempt < max_retries {
                        attempt += 1;
                        let delay = RETRY_BACKOFF_INITIAL * (1 << (attempt - 1).min(6)) as u32;
                        warn!(attempt, ?delay, error = %e, "retrying phase");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn snapshot(job: &Job) -> JobStatus {
    JobStatus {
        job_id: job.job_id,
        phase: job.phase,
        progress_percent: job.progress_percent,
        message: job.message.clone(),
        artifacts: job.artifacts.keys().copied().collect(),
        error: job.error.clone(),
    }
}

fn phase_timeout(phase: &str) -> OrchestratorError {
    OrchestratorError::phase(
        phase,
        ErrorKind::ResourceError,
        format!("{phase} exceeded its time budget"),
    )
}

fn job_error_from(error: OrchestratorError) -> JobError {
    match error {
        OrchestratorError::PhaseFailed { error, .. } => error,
        OrchestratorError::InvalidPath(p) => {
            JobError::new(ErrorKind::InputError, format!("invalid path: {p}"))
        }
        OrchestratorError::NotADirectory(p) => {
            JobError::new(ErrorKind::InputError, format!("not a directory: {p}"))
        }
        other => JobError::new(ErrorKind::InternalError, other.to_string()),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| {
        OrchestratorError::phase(
            "artifact",
            ErrorKind::ResourceError,
            format!("could not write {}: {e}", path.display()),
        )
    })?;
    Ok(())
}
