use thiserror::Error;

pub type Result<T> = std::result::Result<T, IrError>;

#[derive(Error, Debug)]
pub enum IrError {
    #[error("invalid source path: {0}")]
    InvalidPath(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IrError {
    pub fn cache<E: std::fmt::Display>(e: E) -> Self {
        Self::Cache(e.to_string())
    }
}
