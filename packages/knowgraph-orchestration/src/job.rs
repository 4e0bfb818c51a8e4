//! Job records and the phase state machine.

use crate::artifacts::ArtifactKind;
use crate::error::{JobError, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Created,
    Extracting,
    Transforming,
    Validating,
    Snapshotting,
    Loading,
    Completed,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Created => "created",
            JobPhase::Extracting => "extracting",
            JobPhase::Transforming => "transforming",
            JobPhase::Validating => "validating",
            JobPhase::Snapshotting => "snapshotting",
            JobPhase::Loading => "loading",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
            JobPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled
        )
    }

    /// Legal forward transitions. `Snapshotting` is skipped for append-only
    /// loads, so `Validating` may advance straight to `Loading`.
    fn can_advance_to(&self, next: JobPhase) -> bool {
        use JobPhase::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Created, Extracting)
                | (Extracting, Transforming)
                | (Transforming, Validating)
                | (Validating, Snapshotting)
                | (Validating, Loading)
                | (Snapshotting, Loading)
                | (Loading, Completed)
        )
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Primary coordination record for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub source_path: PathBuf,
    pub phase: JobPhase,
    pub progress_percent: u8,
    pub message: String,
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
    #[serde(default)]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(source_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            source_path,
            phase: JobPhase::Created,
            progress_percent: 0,
            message: "created".to_string(),
            artifacts: BTreeMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Advance to the next phase; progress resets on the transition.
    pub fn advance(&mut self, next: JobPhase, message: impl Into<String>) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.phase.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.phase = next;
        self.progress_percent = if next == JobPhase::Completed { 100 } else { 0 };
        self.message = message.into();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Update progress within the current phase. Progress is monotonic
    /// non-decreasing until the next phase transition resets it.
    pub fn set_progress(&mut self, percent: u8, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.progress_percent = self.progress_percent.max(percent.min(100));
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    pub fn add_artifact(&mut self, kind: ArtifactKind, path: PathBuf) {
        self.artifacts.insert(kind, path);
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: JobError) -> Result<()> {
        self.advance(JobPhase::Failed, error.message.clone())?;
        self.error = Some(error);
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(self.job_id));
        }
        self.advance(JobPhase::Cancelled, reason)
    }
}
