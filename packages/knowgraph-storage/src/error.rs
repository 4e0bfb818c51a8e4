use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("permanent store error: {0}")]
    Permanent(String),

    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("backup error: {0}")]
    Backup(String),

    #[error("backup not found for job {0}")]
    BackupNotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Transient errors are retried with backoff; everything else aborts.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }

    /// Classify a driver error message into transient vs permanent, in the
    /// shape the retry loop expects.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if lowered.contains("timeout")
            || lowered.contains("timed out")
            || lowered.contains("connection")
            || lowered.contains("unavailable")
            || lowered.contains("leader")
            || lowered.contains("backpressure")
        {
            StorageError::Transient(message)
        } else {
            StorageError::Permanent(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(StorageError::classify("connection refused").is_transient());
        assert!(StorageError::classify("transaction timed out").is_transient());
        assert!(StorageError::classify("leader re-election in progress").is_transient());
        assert!(!StorageError::classify("constraint violation").is_transient());
        assert!(!StorageError::classify("authentication failure").is_transient());
    }
}
