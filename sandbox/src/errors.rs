use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("path traversal detected")]
    PathTraversal,
    #[error("operation outside sandbox root")]
    OutsideRoot,
    #[error("file too large: {0} bytes exceeds limit")]
    FileTooLarge(u64),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("invalid curriculum: {0}")]
    InvalidCurriculum(String),
    #[error("malformed curriculum document: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
