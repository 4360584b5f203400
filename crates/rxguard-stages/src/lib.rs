//! RxGuard Stages: the five case stages and the standard pipeline.
//!
//! # Pipeline Flow
//!
//! ```text
//! raw note → extract → gate → retrieve → reason → critic → report
//!              ↓                  ↓          ↓        ↓        ↓
//!           profile          guidelines   risk     flag    report
//!                                                   (audit)  (audit)
//! ```
//!
//! Every stage talks to collaborators through the `rxguard_core` service
//! traits, so the same stages run against the HTTP reasoning client, the
//! guideline store, or the in-process test doubles.

pub mod extraction;
pub mod report;
pub mod retrieval;
pub mod risk_reasoning;
pub mod safety_critic;
mod schemas;

pub use extraction::ExtractionStage;
pub use report::{render_report, ReportStage};
pub use retrieval::{build_query, RetrievalStage};
pub use risk_reasoning::{format_guidelines, RiskReasoningStage};
pub use safety_critic::SafetyCriticStage;

use std::sync::Arc;

use rxguard_audit::AuditSink;
use rxguard_core::{
    ConfidenceGate, Orchestrator, ReasoningService, RetrievalService, Settings, Stage,
};

/// Assemble the standard case pipeline from settings and collaborators.
pub fn standard_pipeline(
    settings: &Settings,
    reasoning: Arc<dyn ReasoningService>,
    retrieval: Arc<dyn RetrievalService>,
    audit: Arc<dyn AuditSink>,
) -> Orchestrator {
    let extraction = ExtractionStage::new(reasoning.clone())
        .with_min_confidence(settings.extraction_confidence_threshold);
    let downstream: Vec<Box<dyn Stage>> = vec![
        Box::new(RetrievalStage::new(retrieval).with_top_k(settings.top_k)),
        Box::new(RiskReasoningStage::new(reasoning.clone())),
        Box::new(SafetyCriticStage::new(reasoning, audit.clone())),
        Box::new(ReportStage::new(audit)),
    ];
    Orchestrator::new(
        Box::new(extraction),
        ConfidenceGate::new(settings.confidence_threshold),
        downstream,
    )
}
