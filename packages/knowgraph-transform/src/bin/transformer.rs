//! Transformer CLI: extraction document → cypher script (+ tuples).
//!
//! ```bash
//! transformer --input extraction.json --job-id <uuid> --output cypher.script \
//!     [--tuples-output tuples.json] [--batch-size N]
//! ```
//!
//! Exit codes: 0 success, 1 failure, 2 invalid arguments, 3 input not found.

use clap::Parser;
use knowgraph_ir::ir::ExtractionDocument;
use knowgraph_ir::ProgressSender;
use knowgraph_transform::transformer::{Transformer, TransformerConfig};
use knowgraph_transform::CypherGenerator;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "transformer")]
#[command(about = "Transform an extraction document into graph tuples and a cypher script")]
struct Cli {
    /// Extraction document produced by the extractor
    #[arg(long)]
    input: PathBuf,

    /// Job identifier embedded in the artifacts
    #[arg(long)]
    job_id: Uuid,

    /// Output path for the cypher script
    #[arg(long)]
    output: PathBuf,

    /// Optional output path for the tuples document
    #[arg(long)]
    tuples_output: Option<PathBuf>,

    /// Modules per batch in streaming mode
    #[arg(long)]
    batch_size: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if !cli.input.exists() {
        error!("input not found: {}", cli.input.display());
        return ExitCode::from(3);
    }

    let bytes = match std::fs::read(&cli.input) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("could not read input: {e}");
            return ExitCode::FAILURE;
        }
    };
    let document: ExtractionDocument = match serde_json::from_slice(&bytes) {
        Ok(document) => document,
        Err(e) => {
            error!("malformed extraction document: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = TransformerConfig::default();
    if let Some(batch_size) = cli.batch_size {
        if batch_size == 0 {
            error!("--batch-size must be positive");
            return ExitCode::from(2);
        }
        config.batch_size = batch_size;
    }
    let transformer = Transformer::new(config);
    let progress = ProgressSender::null(cli.job_id, "transform");

    let tuples = transformer.transform(&document, cli.job_id, &progress);
    let script = CypherGenerator::generate(&tuples);

    if let Err(e) = std::fs::write(&cli.output, &script) {
        error!("could not write script: {e}");
        return ExitCode::FAILURE;
    }

    if let Some(tuples_output) = &cli.tuples_output {
        let bytes = match tuples.to_canonical_json() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("could not serialize tuples: {e}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = std::fs::write(tuples_output, bytes) {
            error!("could not write tuples: {e}");
            return ExitCode::FAILURE;
        }
    }

    info!(
        nodes = tuples.metadata.node_count,
        relationships = tuples.metadata.relationship_count,
        output = %cli.output.display(),
        "transformation complete"
    );
    ExitCode::SUCCESS
}
