use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Error taxonomy carried in job records and phase outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputError,
    ParseError,
    ValidationError,
    TransientStoreError,
    PermanentStoreError,
    ResourceError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputError => "input_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::TransientStoreError => "transient_store_error",
            ErrorKind::PermanentStoreError => "permanent_store_error",
            ErrorKind::ResourceError => "resource_error",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// Only transient store failures are worth re-running a phase for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientStoreError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured error stored on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offending file, batch, or other identifier when one applies.
    #[serde(default)]
    pub detail: Option<String>,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "[{}] {} ({detail})", self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("unknown job: {0}")]
    UnknownJob(Uuid),

    #[error("unknown artifact kind: {0}")]
    UnknownArtifactKind(String),

    #[error("artifact {kind} missing for job {job_id}")]
    ArtifactMissing { job_id: Uuid, kind: String },

    #[error("job {0} is not terminal")]
    JobNotTerminal(Uuid),

    #[error("job {0} is already terminal")]
    AlreadyTerminal(Uuid),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("job registry unavailable: {0}")]
    Registry(String),

    #[error("phase {phase} failed: {error}")]
    PhaseFailed { phase: String, error: JobError },

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn phase(phase: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::PhaseFailed {
            phase: phase.to_string(),
            error: JobError::new(kind, message),
        }
    }
}

/// Classify phase errors from the extractor into the taxonomy.
pub fn classify_ir_error(phase: &str, error: knowgraph_ir::IrError) -> OrchestratorError {
    use knowgraph_ir::IrError;
    match error {
        IrError::Cancelled => OrchestratorError::Cancelled,
        IrError::InvalidPath(p) => OrchestratorError::InvalidPath(p),
        IrError::NotADirectory(p) => OrchestratorError::NotADirectory(p),
        IrError::Io(e) if e.raw_os_error() == Some(28) => {
            // ENOSPC surfaces as a resource problem, with a hint.
            OrchestratorError::phase(
                phase,
                ErrorKind::ResourceError,
                format!("out of disk space: {e}"),
            )
        }
        other => OrchestratorError::phase(phase, ErrorKind::InternalError, other.to_string()),
    }
}

/// Classify loader/backup errors into the taxonomy.
pub fn classify_storage_error(
    phase: &str,
    error: knowgraph_storage::StorageError,
) -> OrchestratorError {
    use knowgraph_storage::StorageError;
    match error {
        StorageError::Cancelled => OrchestratorError::Cancelled,
        StorageError::Transient(m) | StorageError::Unavailable(m) => {
            OrchestratorError::phase(phase, ErrorKind::TransientStoreError, m)
        }
        StorageError::Permanent(m) => {
            OrchestratorError::phase(phase, ErrorKind::PermanentStoreError, m)
        }
        StorageError::Validation(errors) => OrchestratorError::PhaseFailed {
            phase: phase.to_string(),
            error: JobError::new(ErrorKind::ValidationError, errors.join("; ")),
        },
        other => OrchestratorError::phase(phase, ErrorKind::InternalError, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_strings() {
        assert_eq!(ErrorKind::TransientStoreError.as_str(), "transient_store_error");
        assert_eq!(ErrorKind::InputError.as_str(), "input_error");
    }

    #[test]
    fn test_retryability() {
        assert!(ErrorKind::TransientStoreError.is_retryable());
        assert!(!ErrorKind::PermanentStoreError.is_retryable());
        assert!(!ErrorKind::ValidationError.is_retryable());
        assert!(!ErrorKind::ResourceError.is_retryable());
    }

    #[test]
    fn test_storage_classification() {
        let err = classify_storage_error(
            "loading",
            knowgraph_storage::StorageError::Transient("timeout".into()),
        );
        match err {
            OrchestratorError::PhaseFailed { error, .. } => {
                assert_eq!(error.kind, ErrorKind::TransientStoreError);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
