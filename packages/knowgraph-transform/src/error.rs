use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransformError>;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("input not found: {0}")]
    InputNotFound(String),

    #[error("malformed extraction document: {0}")]
    MalformedInput(String),

    #[error("validation failed: {0} error(s)")]
    ValidationFailed(usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
