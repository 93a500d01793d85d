use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("prompt injection detected")]
    InjectionDetected,
    #[error("invalid chunk config: {0}")]
    InvalidChunking(&'static str),
    #[error("index error: {0}")]
    Index(String),
    #[error("audit store error: {0}")]
    Audit(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MinerError>;

impl From<anyhow::Error> for MinerError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
