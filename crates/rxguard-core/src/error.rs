//! Unified Error Model
use thiserror::Error;
use uuid::Uuid;

use crate::state::PipelineState;

/// Failure of an external collaborator (reasoning or retrieval service).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("CONNECT/{0}")]
    Connection(String),

    #[error("TIMEOUT/request timed out after {0}s")]
    Timeout(u64),

    #[error("STATUS/{status}: {body}")]
    Status { status: u16, body: String },

    #[error("MALFORMED/{0}")]
    Malformed(String),

    #[error("CORPUS/{0}")]
    CorpusUnavailable(String),

    #[error("SERVICE/{0}")]
    Other(String),
}

impl ServiceError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Connection(_) | ServiceError::Timeout(_) => true,
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Error taxonomy of a case.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("VALIDATION/{0}")]
    Validation(String),

    #[error("EXTRACTION/confidence {confidence:.2} below threshold {threshold:.2}")]
    Extraction { confidence: f64, threshold: f64 },

    #[error("SCHEMA/{stage}: {message}")]
    Schema { stage: &'static str, message: String },

    #[error("RETRIEVAL/{0}")]
    RetrievalUnavailable(String),

    #[error("SERVICE/{0}")]
    Service(ServiceError),

    #[error("STATE/{0}")]
    StateInvariant(String),
}

impl PipelineError {
    /// Lift a collaborator failure into the case taxonomy for `stage`.
    pub fn from_service(stage: &'static str, err: ServiceError) -> Self {
        match err {
            ServiceError::Malformed(message) => PipelineError::Schema { stage, message },
            ServiceError::CorpusUnavailable(msg) => PipelineError::RetrievalUnavailable(msg),
            other => PipelineError::Service(other),
        }
    }

    /// Short machine-readable category, used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Extraction { .. } => "extraction",
            PipelineError::Schema { .. } => "schema",
            PipelineError::RetrievalUnavailable(_) => "retrieval_unavailable",
            PipelineError::Service(_) => "service",
            PipelineError::StateInvariant(_) => "state_invariant",
        }
    }
}

/// A case that aborted, together with the state as it stood when it did.
#[derive(Error, Debug)]
#[error("case {case_id} failed at {stage}: {error}")]
pub struct CaseFailure {
    pub case_id: Uuid,
    pub stage: &'static str,
    #[source]
    pub error: PipelineError,
    pub state: Box<PipelineState>,
}
