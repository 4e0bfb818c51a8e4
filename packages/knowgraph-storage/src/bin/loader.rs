//! Loader CLI: apply a tuples document to the graph store.
//!
//! ```bash
//! loader --input tuples.json --job-id <uuid> \
//!     [--clear] [--batch-size N] [--no-validate] [--no-constraints]
//! ```
//!
//! Exit codes: 0 success, 1 failure, 2 invalid arguments, 3 input not
//! found, 4 validation failure, 5 store unavailable.

use clap::Parser;
use knowgraph_ir::ProgressSender;
use knowgraph_storage::{
    write_report, BatchUploader, Neo4jConfig, Neo4jGraphStore, StorageError, UploadOptions,
};
use knowgraph_transform::TupleSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "loader")]
#[command(about = "Upload a tuples document into the graph store")]
struct Cli {
    /// Tuples document produced by the transformer
    #[arg(long)]
    input: PathBuf,

    /// Job identifier embedded in the report artifact
    #[arg(long)]
    job_id: Uuid,

    /// Clear the store before loading (snapshot first when configured)
    #[arg(long)]
    clear: bool,

    /// Items per transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Skip pre-upload validation
    #[arg(long)]
    no_validate: bool,

    /// Skip uniqueness-constraint creation
    #[arg(long)]
    no_constraints: bool,

    /// Where to write the upload report (default: upload_result_<job_id>.json)
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if !cli.input.exists() {
        error!("input not found: {}", cli.input.display());
        return ExitCode::from(3);
    }

    let tuples: TupleSet = match std::fs::read(&cli.input)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(anyhow::Error::from))
    {
        Ok(tuples) => tuples,
        Err(e) => {
            error!("could not read tuples document: {e}");
            return ExitCode::FAILURE;
        }
    };

    let store = match Neo4jConfig::from_env() {
        Ok(config) => match Neo4jGraphStore::connect(config).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("store unavailable: {e}");
                return ExitCode::from(5);
            }
        },
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    let mut options = UploadOptions {
        clear_before_load: cli.clear,
        validate_first: !cli.no_validate,
        create_constraints: !cli.no_constraints,
        ..Default::default()
    };
    if let Some(batch_size) = cli.batch_size {
        if batch_size == 0 {
            error!("--batch-size must be positive");
            return ExitCode::from(2);
        }
        options.batch_size = batch_size;
    }

    let uploader = BatchUploader::new(store);
    let progress = ProgressSender::null(cli.job_id, "load");
    match uploader
        .upload(
            &tuples,
            cli.job_id,
            &options,
            &progress,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(report) => {
            let report_path = cli
                .report
                .unwrap_or_else(|| PathBuf::from(format!("upload_result_{}.json", cli.job_id)));
            if let Err(e) = write_report(&report, &report_path) {
                error!("could not write report: {e}");
                return ExitCode::FAILURE;
            }
            info!(
                nodes = report.nodes_uploaded,
                relationships = report.relationships_uploaded,
                skipped = report.relationships_skipped.len(),
                report = %report_path.display(),
                "upload complete"
            );
            ExitCode::SUCCESS
        }
        Err(StorageError::Validation(errors)) => {
            for problem in &errors {
                error!("validation: {problem}");
            }
            ExitCode::from(4)
        }
        Err(StorageError::Unavailable(message)) => {
            error!("store unavailable: {message}");
            ExitCode::from(5)
        }
        Err(e) => {
            error!("upload failed: {e}");
            ExitCode::FAILURE
        }
    }
}
