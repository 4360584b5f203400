use std::sync::Arc;

use async_trait::async_trait;
use rxguard_core::{
    complete_structured, CaseContext, GuidelinePassage, PipelineError, PipelineState,
    ReasoningRequest, ReasoningService, RiskAnalysis, Stage,
};
use tracing::{info, warn};

use crate::schemas::RISK_SCHEMA;

pub const TASK: &str = "risk_reasoning";

const SYSTEM_PROMPT: &str = "You are an expert clinical pharmacist and risk reasoning system.
Your goal is to evaluate the safety of a proposed medication for a specific patient, using ONLY the provided clinical guidelines.";

const INSTRUCTIONS: &str = "Analyze the clinical risk of the proposed medication for this patient.

Strictly follow these steps:
1. Review the Patient Context (conditions, risk factors, age).
2. Review the Proposed Medication (dose, frequency).
3. Search the Guideline Excerpts for ANY contraindications, warnings, or dose adjustments relevant to this patient's specific conditions or demographics.
4. If a risk is found, explain the physiological mechanism.
5. Assign a risk level (low, moderate, high).
6. Cite the specific guideline source and page number for every claim.

If the medication is safe based on the provided guidelines, state \"low\" risk.
If the guidelines do not mention the medication or condition, state \"low\" risk and say in the summary that no specific guideline evidence was found, rather than asserting the medication is safe.";

const NO_EXCERPTS: &str = "(no guideline excerpts were retrieved)";

/// Format passages for the prompt, keeping retrieval order.
pub fn format_guidelines(passages: &[GuidelinePassage]) -> String {
    if passages.is_empty() {
        return NO_EXCERPTS.to_string();
    }
    passages
        .iter()
        .map(|g| format!("Source: {}, Page: {}\n{}", g.source, g.page, g.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Asks the reasoning service for a guideline-grounded risk assessment.
pub struct RiskReasoningStage {
    reasoning: Arc<dyn ReasoningService>,
}

impl RiskReasoningStage {
    pub fn new(reasoning: Arc<dyn ReasoningService>) -> Self {
        Self { reasoning }
    }
}

#[async_trait]
impl Stage for RiskReasoningStage {
    fn id(&self) -> &'static str {
        "reason.risk.v1"
    }

    async fn run(&self, state: &mut PipelineState, ctx: &CaseContext) -> Result<(), PipelineError> {
        let (Some(profile), Some(medication), Some(guidelines)) = (
            state.patient_profile(),
            state.proposed_medication(),
            state.retrieved_guidelines(),
        ) else {
            return Err(PipelineError::StateInvariant(
                "risk reasoning requires profile, medication and guidelines".to_string(),
            ));
        };

        let prompt = format!(
            "{INSTRUCTIONS}\n\nPatient Context:\n{}\n\nProposed Medication:\n{}\n\nGuideline Excerpts:\n{}",
            to_json(profile)?,
            to_json(medication)?,
            format_guidelines(guidelines),
        );
        let request = ReasoningRequest {
            task: TASK,
            system: SYSTEM_PROMPT.to_string(),
            prompt,
            schema: RISK_SCHEMA.clone(),
        };

        let analysis: RiskAnalysis = complete_structured(self.reasoning.as_ref(), TASK, &request).await?;

        for citation in &analysis.evidence {
            let retrieved = guidelines
                .iter()
                .any(|g| g.source == citation.source && g.page == citation.page);
            if !retrieved {
                warn!(
                    case_id = %ctx.case_id,
                    source = %citation.source,
                    page = citation.page,
                    "cited evidence does not match a retrieved passage"
                );
            }
        }

        info!(
            case_id = %ctx.case_id,
            stage = self.id(),
            risk_level = %analysis.risk_level,
            citations = analysis.evidence.len(),
            "risk analysis complete"
        );

        state.record_risk_analysis(analysis)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, PipelineError> {
    serde_json::to_string_pretty(value).map_err(|e| PipelineError::Schema {
        stage: TASK,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxguard_core::test_utils::ScriptedReasoning;
    use rxguard_core::{PatientProfile, ProposedMedication, RiskLevel};
    use serde_json::json;

    fn retrieved_state(passages: Vec<GuidelinePassage>) -> PipelineState {
        let mut state = PipelineState::new("note");
        state
            .record_extraction(PatientProfile::default(), ProposedMedication::default(), 0.9)
            .unwrap();
        state.record_guidelines(passages).unwrap();
        state
    }

    fn passage() -> GuidelinePassage {
        GuidelinePassage {
            source: "kdigo.txt".into(),
            page: 4,
            content: "Avoid NSAIDs in CKD stage 3.".into(),
        }
    }

    #[test]
    fn guideline_text_format() {
        assert_eq!(
            format_guidelines(&[passage()]),
            "Source: kdigo.txt, Page: 4\nAvoid NSAIDs in CKD stage 3."
        );
        assert_eq!(format_guidelines(&[]), NO_EXCERPTS);
    }

    #[tokio::test]
    async fn records_analysis_and_sends_excerpts() {
        let reasoning = Arc::new(ScriptedReasoning::new().respond(
            TASK,
            json!({
                "summary": "NSAID use in CKD stage 3 risks acute kidney injury.",
                "mechanism": "Prostaglandin inhibition reduces renal perfusion",
                "evidence": [{"source": "kdigo.txt", "page": 4}],
                "risk_level": "high"
            }),
        ));
        let stage = RiskReasoningStage::new(reasoning.clone());
        let mut state = retrieved_state(vec![passage()]);
        stage.run(&mut state, &CaseContext::new()).await.unwrap();

        assert_eq!(state.risk_analysis().unwrap().risk_level, RiskLevel::High);
        let prompt = &reasoning.requests()[0].prompt;
        assert!(prompt.contains("Source: kdigo.txt, Page: 4"));
        assert!(prompt.contains("state \"low\" risk"));
    }

    #[tokio::test]
    async fn unknown_risk_level_is_schema_error() {
        let reasoning = Arc::new(ScriptedReasoning::new().respond(
            TASK,
            json!({"summary": "s", "mechanism": "m", "evidence": [], "risk_level": "severe"}),
        ));
        let stage = RiskReasoningStage::new(reasoning);
        let mut state = retrieved_state(vec![]);
        let err = stage.run(&mut state, &CaseContext::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Schema { stage: TASK, .. }));
        assert!(state.risk_analysis().is_none());
    }

    #[tokio::test]
    async fn empty_retrieval_still_reasons() {
        let reasoning = Arc::new(ScriptedReasoning::new().respond(
            TASK,
            json!({
                "summary": "No specific guideline evidence found.",
                "mechanism": "",
                "evidence": [],
                "risk_level": "low"
            }),
        ));
        let stage = RiskReasoningStage::new(reasoning.clone());
        let mut state = retrieved_state(vec![]);
        stage.run(&mut state, &CaseContext::new()).await.unwrap();
        assert!(reasoning.requests()[0].prompt.contains(NO_EXCERPTS));
        assert_eq!(state.risk_analysis().unwrap().risk_level, RiskLevel::Low);
    }
}
