//! Cache-aware parallel extraction with an adaptive worker pool.
//!
//! A dispatcher feeds file tasks into a `JoinSet` of blocking parse tasks.
//! The pool width floats inside `[worker_min, worker_max]`: every 16
//! completions the dispatcher samples resident memory against the soft cap
//! and shrinks (>85 %) or grows (<55 % with backlog). The cancellation token
//! is checked at the head of every file task and at every dispatch step; a
//! cancelled run publishes no artifact.

use super::discovery::{discover, DiscoveryConfig};
use super::memory::MemoryMonitor;
use crate::cache::{content_fingerprint, ParseCache};
use crate::errors::{IrError, Result};
use crate::ir::{
    ExtractionDocument, ExtractionMetadata, ExtractionStatistics, ParsedModule,
};
use crate::parser::{PythonParser, PARSER_VERSION};
use crate::progress::ProgressSender;
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ADJUST_EVERY_COMPLETIONS: u64 = 16;
const SHRINK_UTILIZATION: f64 = 0.85;
const GROW_UTILIZATION: f64 = 0.55;

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub source_path: PathBuf,
    pub discovery: DiscoveryConfig,
    pub worker_min: usize,
    pub worker_max: usize,
    pub memory_soft_cap_mb: u64,
    pub parse_timeout: Duration,
}

impl ExtractorConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            discovery: DiscoveryConfig::default(),
            worker_min: 2,
            worker_max: default_worker_max(),
            memory_soft_cap_mb: 2048,
            parse_timeout: Duration::from_secs(30),
        }
    }
}

pub fn default_worker_max() -> usize {
    (2 * num_cpus::get()).min(32)
}

/// Parallelism window controller.
struct WidthController {
    min: usize,
    max: usize,
    width: usize,
    since_adjust: u64,
}

impl WidthController {
    fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            min,
            max,
            width: num_cpus::get().clamp(min, max),
            since_adjust: 0,
        }
    }

    fn width(&self) -> usize {
        self.width
    }

    fn on_completion(&mut self, utilization: f64, backlog: usize) -> usize {
        self.since_adjust += 1;
        if self.since_adjust >= ADJUST_EVERY_COMPLETIONS {
            self.since_adjust = 0;
            if utilization > SHRINK_UTILIZATION {
                self.width = (self.width - 1).max(self.min);
            } else if utilization < GROW_UTILIZATION && backlog > 0 {
                self.width = (self.width + 1).min(self.max);
            }
        }
        self.width
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files_discovered: usize,
    pub files_parsed: usize,
    pub files_cached: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub output_path: PathBuf,
}

enum FileOutcome {
    Parsed {
        rel_path: String,
        module: Box<ParsedModule>,
    },
    Cached {
        rel_path: String,
        module: Box<ParsedModule>,
    },
    Failed {
        rel_path: String,
        message: String,
    },
    Cancelled,
}

/// Runs one extraction phase end to end.
pub struct ExtractionEngine {
    config: ExtractorConfig,
    cache: Option<Arc<ParseCache>>,
}

impl ExtractionEngine {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ParseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Produce `extraction_<job_id>.json` at `output_path`.
    pub async fn run(
        &self,
        job_id: uuid::Uuid,
        output_path: &Path,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<ExtractionSummary> {
        let (files, warnings) = discover(&self.config.source_path, &self.config.discovery)?;
        let total = files.len() as u64;
        let skipped = warnings.len();
        info!(files = total, skipped, "discovery complete");
        progress.started(total, format!("discovered {total} files"));
        for warning in &warnings {
            progress.warning(warning.clone());
        }

        let mut pending: VecDeque<_> = files.into();
        let mut joinset: JoinSet<FileOutcome> = JoinSet::new();
        let monitor = MemoryMonitor::new(self.config.memory_soft_cap_mb);
        let mut controller = WidthController::new(self.config.worker_min, self.config.worker_max);

        let mut modules: BTreeMap<String, ParsedModule> = BTreeMap::new();
        let mut errors: Vec<String> = Vec::new();
        let mut summary = ExtractionSummary {
            files_discovered: total as usize,
            files_skipped: skipped,
            output_path: output_path.to_path_buf(),
            ..Default::default()
        };
        let mut completed = 0u64;

        while !pending.is_empty() || !joinset.is_empty() {
            if cancel.is_cancelled() {
                break;
            }

            while joinset.len() < controller.width()
                && !pending.is_empty()
                && !cancel.is_cancelled()
            {
                let file = pending.pop_front().expect("non-empty backlog");
                let cache = self.cache.clone();
                let token = cancel.clone();
                let timeout = self.config.parse_timeout;
                let (abs_path, rel_path) = (file.abs_path, file.rel_path);
                joinset.spawn_blocking(move || {
                    process_file(&abs_path, rel_path, cache, timeout, &token)
                });
            }

            let Some(joined) = joinset.join_next().await else {
                continue;
            };
            completed += 1;

            match joined {
                Ok(FileOutcome::Parsed { rel_path, module }) => {
                    summary.files_parsed += 1;
                    progress.step_completed(completed, total, format!("parsed {rel_path}"));
                    modules.insert(rel_path, *module);
                }
                Ok(FileOutcome::Cached { rel_path, module }) => {
                    summary.files_cached += 1;
                    progress.step_completed(completed, total, format!("cached {rel_path}"));
                    modules.insert(rel_path, *module);
                }
                Ok(FileOutcome::Failed { rel_path, message }) => {
                    summary.files_failed += 1;
                    warn!(file = %rel_path, error = %message, "file failed");
                    progress.step_completed(completed, total, format!("failed {rel_path}"));
                    errors.push(format!("{rel_path}: {message}"));
                }
                Ok(FileOutcome::Cancelled) => {}
                Err(join_err) => {
                    summary.files_failed += 1;
                    errors.push(format!("worker panicked: {join_err}"));
                }
            }

            let width = controller.on_completion(monitor.utilization(), pending.len());
            debug!(width, completed, "pool width");
        }

        if cancel.is_cancelled() {
            joinset.shutdown().await;
            return Err(IrError::Cancelled);
        }

        if summary.files_discovered > 0 && modules.is_empty() {
            return Err(IrError::ExtractionFailed(format!(
                "none of {} discovered files could be read",
                summary.files_discovered
            )));
        }

        let mut document = ExtractionDocument {
            metadata: ExtractionMetadata {
                job_id,
                generated_at: chrono::Utc::now(),
                source_path: self.config.source_path.display().to_string(),
                file_count: modules.len(),
                parser_version: PARSER_VERSION.to_string(),
            },
            modules,
            statistics: ExtractionStatistics {
                files_discovered: summary.files_discovered,
                files_parsed: summary.files_parsed,
                files_cached: summary.files_cached,
                files_failed: summary.files_failed,
                files_skipped: summary.files_skipped,
                ..Default::default()
            },
            errors,
            warnings,
        };
        document.recompute_statistics();

        write_atomic(output_path, &document)?;

        progress.finished(
            total,
            format!(
                "extracted {} modules ({} parsed, {} cached, {} failed)",
                document.modules.len(),
                summary.files_parsed,
                summary.files_cached,
                summary.files_failed
            ),
            serde_json::json!({
                "parsed": summary.files_parsed,
                "cached": summary.files_cached,
                "failed": summary.files_failed,
            }),
        );

        Ok(summary)
    }
}

fn process_file(
    abs_path: &Path,
    rel_path: String,
    cache: Option<Arc<ParseCache>>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> FileOutcome {
    if cancel.is_cancelled() {
        return FileOutcome::Cancelled;
    }

    let bytes = match std::fs::read(abs_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return FileOutcome::Failed {
                rel_path,
                message: e.to_string(),
            }
        }
    };

    let fingerprint = content_fingerprint(&bytes);

    if let Some(cache) = &cache {
        if let Some(module) = cache.get(&fingerprint) {
            return FileOutcome::Cached {
                rel_path,
                module: Box::new(module),
            };
        }
    }

    let source = String::from_utf8_lossy(&bytes);
    let parser = PythonParser::with_timeout(timeout);
    let module = parser.parse_module(&rel_path, &source, &fingerprint);

    if let Some(cache) = &cache {
        crate::cache::put_best_effort(cache, &fingerprint, &module);
    }

    FileOutcome::Parsed {
        rel_path,
        module: Box::new(module),
    }
}

fn write_atomic(output_path: &Path, document: &ExtractionDocument) -> Result<()> {
    let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&serde_json::to_vec_pretty(document)?)?;
    tmp.flush()?;
    tmp.persist(output_path)
        .map_err(|e| IrError::ExtractionFailed(format!("could not write artifact: {e}")))?;
    Ok(())
}
