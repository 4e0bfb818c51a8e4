//! knowgraph-orchestration: job lifecycle and phase coordination for the
//! extract → transform → validate → snapshot → load pipeline.
//!
//! The [`AnalysisOrchestrator`] owns the job registry (a single-task actor),
//! sequences phases as isolated tasks, publishes progress to subscribers,
//! and exposes the artifact download surface the HTTP front door serves.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod registry;
pub mod status;

pub use artifacts::{ArtifactKind, ArtifactStore};
pub use config::{OrchestratorConfig, PhaseTimeouts};
pub use error::{ErrorKind, JobError, OrchestratorError, Result};
pub use job::{Job, JobPhase};
pub use orchestrator::{AnalysisOrchestrator, JobResults, JobStatus};
pub use registry::{JobRegistry, JobUpdate};
pub use status::StatusChannel;
