//! Orchestrator: runs one case through extraction, the confidence gate and
//! the downstream stages, collecting a proof per step.
use std::time::Instant;

use uuid::Uuid;

use crate::context::CaseContext;
use crate::data_model::StageProof;
use crate::error::{CaseFailure, PipelineError};
use crate::gate::{ConfidenceGate, GateDecision};
use crate::stage::Stage;
use crate::state::PipelineState;

const GATE_ID: &str = "gate.confidence";

/// Result of a case that did not fail: either a completed report or a halt.
#[derive(Debug, Clone)]
pub struct CaseRun {
    pub case_id: Uuid,
    pub pipeline_id: String,
    pub decision: GateDecision,
    pub state: PipelineState,
    pub proofs: Vec<StageProof>,
}

impl CaseRun {
    pub fn is_halted(&self) -> bool {
        self.decision == GateDecision::Halt
    }
}

pub struct Orchestrator {
    extraction: Box<dyn Stage>,
    gate: ConfidenceGate,
    downstream: Vec<Box<dyn Stage>>,
    pipeline_id: String,
}

impl Orchestrator {
    pub fn new(
        extraction: Box<dyn Stage>,
        gate: ConfidenceGate,
        downstream: Vec<Box<dyn Stage>>,
    ) -> Self {
        let pipeline_id = std::iter::once(extraction.id())
            .chain(std::iter::once(GATE_ID))
            .chain(downstream.iter().map(|s| s.id()))
            .map(|id| id.split('.').next().unwrap_or("?"))
            .collect::<Vec<_>>()
            .join("→");

        Self {
            extraction,
            gate,
            downstream,
            pipeline_id,
        }
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn gate(&self) -> &ConfidenceGate {
        &self.gate
    }

    /// Run a case and return its final state.
    ///
    /// A gate halt is not an error: the state comes back with no report.
    pub async fn run(&self, raw_note: &str) -> Result<PipelineState, CaseFailure> {
        self.run_case(raw_note, CaseContext::new())
            .await
            .map(|run| run.state)
    }

    pub async fn run_case(&self, raw_note: &str, ctx: CaseContext) -> Result<CaseRun, CaseFailure> {
        let started = Instant::now();
        let mut state = PipelineState::new(raw_note);
        let mut proofs = Vec::new();

        if raw_note.trim().is_empty() {
            let error = PipelineError::Validation("raw_note is empty".to_string());
            return Err(self.fail(&ctx, "intake", error, state));
        }

        tracing::info!(
            case_id = %ctx.case_id,
            pipeline = %self.pipeline_id,
            note_chars = raw_note.chars().count(),
            "case started"
        );

        if let Err(error) = execute(self.extraction.as_ref(), &mut state, &ctx, &mut proofs).await {
            return Err(self.fail(&ctx, self.extraction.id(), error, state));
        }

        let gate_started = Instant::now();
        let decision = self.gate.evaluate(&state);
        proofs.push(proof(GATE_ID, &state, true, gate_started));

        if decision == GateDecision::Halt {
            tracing::warn!(
                case_id = %ctx.case_id,
                confidence = ?state.confidence(),
                threshold = self.gate.threshold(),
                "low extraction confidence, halting case"
            );
            return Ok(self.finish(ctx, decision, state, proofs, started));
        }

        tracing::info!(
            case_id = %ctx.case_id,
            confidence = ?state.confidence(),
            "confidence sufficient, continuing"
        );

        for stage in &self.downstream {
            if let Err(error) = execute(stage.as_ref(), &mut state, &ctx, &mut proofs).await {
                return Err(self.fail(&ctx, stage.id(), error, state));
            }
        }

        Ok(self.finish(ctx, decision, state, proofs, started))
    }

    fn finish(
        &self,
        ctx: CaseContext,
        decision: GateDecision,
        state: PipelineState,
        proofs: Vec<StageProof>,
        started: Instant,
    ) -> CaseRun {
        tracing::info!(
            case_id = %ctx.case_id,
            decision = ?decision,
            stages = proofs.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "case finished"
        );
        CaseRun {
            case_id: ctx.case_id,
            pipeline_id: self.pipeline_id.clone(),
            decision,
            state,
            proofs,
        }
    }

    fn fail(
        &self,
        ctx: &CaseContext,
        stage: &'static str,
        error: PipelineError,
        state: PipelineState,
    ) -> CaseFailure {
        if let PipelineError::Extraction { .. } = error {
            tracing::warn!(case_id = %ctx.case_id, stage, error = %error, "case rejected");
        } else {
            tracing::error!(
                case_id = %ctx.case_id,
                stage,
                kind = error.kind(),
                error = %error,
                "case failed"
            );
        }
        CaseFailure {
            case_id: ctx.case_id,
            stage,
            error,
            state: Box::new(state),
        }
    }
}

/// Run one stage with state validation on both sides of it.
async fn execute(
    stage: &dyn Stage,
    state: &mut PipelineState,
    ctx: &CaseContext,
    proofs: &mut Vec<StageProof>,
) -> Result<(), PipelineError> {
    state.validate()?;
    let started = Instant::now();
    tracing::info!(case_id = %ctx.case_id, stage = stage.id(), "stage started");

    stage.run(state, ctx).await?;
    state.validate()?;

    proofs.push(proof(stage.id(), state, stage.deterministic(), started));
    Ok(())
}

fn proof(id: &str, state: &PipelineState, deterministic: bool, started: Instant) -> StageProof {
    StageProof {
        id: id.to_string(),
        state_hash: hash_state(state),
        deterministic,
        latency_ms: started.elapsed().as_millis() as u64,
    }
}

fn hash_state(state: &PipelineState) -> String {
    let bytes = serde_json::to_vec(state).unwrap_or_default();
    format!("blake3:{}", blake3::hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::{PatientProfile, ProposedMedication};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedExtraction(f64);

    #[async_trait]
    impl Stage for FixedExtraction {
        fn id(&self) -> &'static str {
            "extract.fixed.v1"
        }

        async fn run(&self, state: &mut PipelineState, _ctx: &CaseContext) -> Result<(), PipelineError> {
            state.record_extraction(PatientProfile::default(), ProposedMedication::default(), self.0)
        }
    }

    struct Counting {
        id: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Stage for Counting {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn run(&self, state: &mut PipelineState, _ctx: &CaseContext) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PipelineError::RetrievalUnavailable("no corpus".to_string()));
            }
            state.record_guidelines(vec![])
        }
    }

    fn orchestrator(confidence: f64, fail: bool) -> (Orchestrator, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let downstream: Vec<Box<dyn Stage>> = vec![Box::new(Counting {
            id: "retrieve.counting.v1",
            calls: calls.clone(),
            fail,
        })];
        let orchestrator = Orchestrator::new(
            Box::new(FixedExtraction(confidence)),
            ConfidenceGate::default(),
            downstream,
        );
        (orchestrator, calls)
    }

    #[test]
    fn test_pipeline_id() {
        let (orchestrator, _) = orchestrator(0.9, false);
        assert_eq!(orchestrator.pipeline_id(), "extract→gate→retrieve");
    }

    #[tokio::test]
    async fn test_whitespace_note_fails_before_any_stage() {
        let (orchestrator, calls) = orchestrator(0.9, false);
        let failure = orchestrator.run("   \n\t").await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::Validation(_)));
        assert_eq!(failure.stage, "intake");
        assert!(failure.state.confidence().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_halt_skips_downstream() {
        let (orchestrator, calls) = orchestrator(0.4, false);
        let run = orchestrator.run_case("some clinical note", CaseContext::new()).await.unwrap();
        assert!(run.is_halted());
        assert_eq!(run.state.confidence(), Some(0.4));
        assert!(run.state.retrieved_guidelines().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(run.proofs.len(), 2);
    }

    #[tokio::test]
    async fn test_continue_runs_downstream_with_proofs() {
        let (orchestrator, calls) = orchestrator(0.9, false);
        let run = orchestrator.run_case("some clinical note", CaseContext::new()).await.unwrap();
        assert!(!run.is_halted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let ids: Vec<&str> = run.proofs.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["extract.fixed.v1", "gate.confidence", "retrieve.counting.v1"]);
        assert!(run.proofs.iter().all(|p| p.state_hash.starts_with("blake3:")));
        assert_ne!(run.proofs[0].state_hash, run.proofs[2].state_hash);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_state() {
        let (orchestrator, _) = orchestrator(0.9, true);
        let failure = orchestrator.run("some clinical note").await.unwrap_err();
        assert_eq!(failure.stage, "retrieve.counting.v1");
        assert!(matches!(failure.error, PipelineError::RetrievalUnavailable(_)));
        assert_eq!(failure.state.confidence(), Some(0.9));
        assert!(failure.state.retrieved_guidelines().is_none());
    }
}
