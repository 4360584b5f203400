//! RxGuard Core: case state, stage contract, confidence gate and orchestrator
//!
//! ```text
//! raw note → extract → gate ─┬─ continue → retrieve → reason → critic → report
//!                            └─ halt (no report, not an error)
//! ```

pub mod config;
pub mod context;
pub mod data_model;
pub mod error;
pub mod gate;
pub mod retry;
pub mod runner;
pub mod services;
pub mod stage;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConfigError, LogFormat, Settings};
pub use context::CaseContext;
pub use data_model::{
    EvidenceCitation, FinalReport, GuidelinePassage, PatientProfile, ProposedMedication,
    RiskAnalysis, RiskLevel, SafetyFlag, SafetyLevel, Sex, StageProof,
};
pub use error::{CaseFailure, PipelineError, ServiceError};
pub use gate::{ConfidenceGate, GateDecision, DEFAULT_CONFIDENCE_THRESHOLD};
pub use retry::{RetryPolicy, Retrying};
pub use runner::{CaseRun, Orchestrator};
pub use services::{complete_structured, ReasoningRequest, ReasoningService, RetrievalService};
pub use stage::Stage;
pub use state::PipelineState;

/// Engine version reported by the transport wrapper.
pub const RXGUARD_VERSION: &str = "0.1.0";
