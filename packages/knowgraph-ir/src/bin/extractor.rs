//! Extractor CLI: parse a Python source tree into an extraction document.
//!
//! ```bash
//! extractor --path ./src --job-id <uuid> --output extraction.json \
//!     [--include '**/*.py']... [--exclude 'tests/**']... \
//!     [--max-file-bytes N] [--cache-dir DIR] [--no-cache]
//! ```
//!
//! Exit codes: 0 success, 1 failure, 2 invalid arguments, 3 input not found.

use clap::Parser;
use knowgraph_ir::extract::{ExtractionEngine, ExtractorConfig};
use knowgraph_ir::{CacheConfig, IrError, ParseCache, ProgressSender};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "extractor")]
#[command(about = "Parse a Python source tree into a knowledge-graph extraction document")]
struct Cli {
    /// Source directory to analyze
    #[arg(long)]
    path: PathBuf,

    /// Job identifier embedded in the artifact
    #[arg(long)]
    job_id: Uuid,

    /// Output file for the extraction document
    #[arg(long)]
    output: PathBuf,

    /// Include glob patterns (default: **/*.py)
    #[arg(long)]
    include: Vec<String>,

    /// Exclude glob patterns
    #[arg(long)]
    exclude: Vec<String>,

    /// Per-file size cap in bytes
    #[arg(long)]
    max_file_bytes: Option<u64>,

    /// Cache directory (defaults to $CACHE_DIR when set)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Disable the parse cache entirely
    #[arg(long)]
    no_cache: bool,
}

fn env_u64(name: &str) -> Result<Option<u64>, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("malformed {name}: {raw:?}")),
        Err(_) => Ok(None),
    }
}

fn build_config(cli: &Cli) -> Result<ExtractorConfig, String> {
    let mut config = ExtractorConfig::new(&cli.path);
    if !cli.include.is_empty() {
        config.discovery.include = cli.include.clone();
    }
    config.discovery.exclude = cli.exclude.clone();

    if let Some(cap) = cli.max_file_bytes.or(env_u64("PARSE_MAX_FILE_BYTES")?) {
        config.discovery.max_file_bytes = cap;
    }
    if let Some(min) = env_u64("PARSE_WORKER_MIN")? {
        config.worker_min = min as usize;
    }
    if let Some(max) = env_u64("PARSE_WORKER_MAX")? {
        config.worker_max = max as usize;
    }
    if let Some(cap) = env_u64("MEMORY_SOFT_CAP_MB")? {
        config.memory_soft_cap_mb = cap;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            error!("{message}");
            return ExitCode::from(2);
        }
    };

    let cache = if cli.no_cache {
        None
    } else {
        let cache_dir = cli
            .cache_dir
            .clone()
            .or_else(|| std::env::var("CACHE_DIR").ok().map(PathBuf::from));
        match cache_dir {
            Some(dir) => match ParseCache::open(CacheConfig::new(dir)) {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    error!("could not open cache: {e}");
                    None
                }
            },
            None => None,
        }
    };

    let mut engine = ExtractionEngine::new(config);
    if let Some(cache) = cache {
        engine = engine.with_cache(cache);
    }

    let progress = ProgressSender::null(cli.job_id, "extract");
    match engine
        .run(cli.job_id, &cli.output, progress, CancellationToken::new())
        .await
    {
        Ok(summary) => {
            info!(
                parsed = summary.files_parsed,
                cached = summary.files_cached,
                failed = summary.files_failed,
                output = %cli.output.display(),
                "extraction complete"
            );
            ExitCode::SUCCESS
        }
        Err(IrError::InvalidPath(path)) => {
            error!("source path not found: {path}");
            ExitCode::from(3)
        }
        Err(IrError::NotADirectory(path)) => {
            error!("not a directory: {path}");
            ExitCode::from(3)
        }
        Err(e) => {
            error!("extraction failed: {e}");
            ExitCode::FAILURE
        }
    }
}
