use std::path::PathBuf;

use rxguard_core::ServiceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Guideline directory not found: {0}")]
    CorpusNotFound(PathBuf),

    #[error("Failed to read PDF {path}: {message}")]
    Pdf { path: PathBuf, message: String },

    #[error("No guideline documents in {0}")]
    EmptyCorpus(PathBuf),

    #[error("Index was built with embedding model {found}, expected {expected}")]
    ModelMismatch { expected: String, found: String },

    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Index build task failed: {0}")]
    Task(String),
}

impl From<IndexError> for ServiceError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Embedding(msg) => ServiceError::Other(msg),
            other => ServiceError::CorpusUnavailable(other.to_string()),
        }
    }
}
