//! Confidence gate between extraction and the rest of the pipeline
//!
//! Decides whether a case is worth the downstream retrieval and reasoning
//! cost. Pure: it only reads `PipelineState::confidence`.

use serde::{Deserialize, Serialize};

use crate::state::PipelineState;

/// Default minimum extraction confidence for a case to continue.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Continue,
    Halt,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceGate {
    threshold: f64,
}

impl ConfidenceGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `Continue` iff confidence is present and at least the threshold.
    pub fn evaluate(&self, state: &PipelineState) -> GateDecision {
        match state.confidence() {
            Some(confidence) if confidence >= self.threshold => GateDecision::Continue,
            _ => GateDecision::Halt,
        }
    }
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}
