use std::sync::Arc;

use async_trait::async_trait;
use rxguard_audit::{AuditEvent, AuditEventType, AuditSink};
use rxguard_core::{
    complete_structured, CaseContext, PipelineError, PipelineState, ReasoningRequest,
    ReasoningService, SafetyFlag, SafetyLevel, Stage,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::schemas::SAFETY_SCHEMA;

pub const TASK: &str = "safety_critic";

const SYSTEM_PROMPT: &str = "You are a clinical safety critic system.";

const INSTRUCTIONS: &str = "TASK:
Review the patient context, proposed medication, and risk analysis.
Identify whether this case requires escalation due to potential
serious or irreversible harm.

RULES:
- Do NOT repeat the full risk explanation.
- Do NOT give medical advice.
- Do NOT suggest alternatives.
- Flag only significant safety concerns with level \"warning\" or \"critical\".
- If no escalation is required, return level \"info\" with an empty reason.
- Output must strictly match the JSON schema.";

/// Both fields are optional so an empty object reads as "no escalation".
#[derive(Debug, Default, Deserialize)]
struct CriticAnswer {
    #[serde(default)]
    level: Option<SafetyLevel>,
    #[serde(default)]
    reason: Option<String>,
}

impl From<CriticAnswer> for SafetyFlag {
    fn from(answer: CriticAnswer) -> Self {
        SafetyFlag {
            level: answer.level.unwrap_or_default(),
            reason: answer.reason.unwrap_or_default(),
        }
    }
}

/// Second-opinion pass that decides whether the case needs escalation.
/// Warning and critical flags are also sent to the audit sink.
pub struct SafetyCriticStage {
    reasoning: Arc<dyn ReasoningService>,
    audit: Arc<dyn AuditSink>,
}

impl SafetyCriticStage {
    pub fn new(reasoning: Arc<dyn ReasoningService>, audit: Arc<dyn AuditSink>) -> Self {
        Self { reasoning, audit }
    }
}

#[async_trait]
impl Stage for SafetyCriticStage {
    fn id(&self) -> &'static str {
        "critic.safety.v1"
    }

    async fn run(&self, state: &mut PipelineState, ctx: &CaseContext) -> Result<(), PipelineError> {
        let (Some(profile), Some(medication), Some(analysis)) = (
            state.patient_profile(),
            state.proposed_medication(),
            state.risk_analysis(),
        ) else {
            return Err(PipelineError::StateInvariant(
                "safety critic requires profile, medication and risk analysis".to_string(),
            ));
        };

        let context = serde_json::json!({
            "patient_context": profile,
            "medication_context": medication,
            "risk_analysis": analysis,
        });
        let request = ReasoningRequest {
            task: TASK,
            system: SYSTEM_PROMPT.to_string(),
            prompt: format!("{INSTRUCTIONS}\n\nCASE:\n{context:#}"),
            schema: SAFETY_SCHEMA.clone(),
        };

        let answer: CriticAnswer = complete_structured(self.reasoning.as_ref(), TASK, &request).await?;
        let flag = SafetyFlag::from(answer);
        let level = flag.level;

        if level.is_escalation() {
            warn!(
                case_id = %ctx.case_id,
                stage = self.id(),
                level = %level,
                reason = %flag.reason,
                "safety escalation"
            );
        } else {
            info!(case_id = %ctx.case_id, stage = self.id(), "safety check passed");
        }

        state.record_safety_flag(flag)?;

        if level.is_escalation() {
            self.audit.record(AuditEvent::from_state(
                AuditEventType::SafetyEscalation,
                ctx.case_id,
                state,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxguard_audit::AuditLog;
    use rxguard_core::test_utils::ScriptedReasoning;
    use rxguard_core::{GuidelinePassage, PatientProfile, ProposedMedication, RiskAnalysis, RiskLevel};
    use serde_json::json;

    fn analysed_state() -> PipelineState {
        let mut state = PipelineState::new("note");
        state
            .record_extraction(PatientProfile::default(), ProposedMedication::default(), 0.9)
            .unwrap();
        state.record_guidelines(Vec::<GuidelinePassage>::new()).unwrap();
        state
            .record_risk_analysis(RiskAnalysis {
                summary: "s".into(),
                mechanism: "m".into(),
                evidence: vec![],
                risk_level: RiskLevel::High,
            })
            .unwrap();
        state
    }

    async fn run_with(answer: serde_json::Value) -> (Result<(), PipelineError>, PipelineState, Arc<AuditLog>) {
        let reasoning = Arc::new(ScriptedReasoning::new().respond(TASK, answer));
        let audit = Arc::new(AuditLog::new());
        let stage = SafetyCriticStage::new(reasoning, audit.clone());
        let mut state = analysed_state();
        let result = stage.run(&mut state, &CaseContext::new()).await;
        (result, state, audit)
    }

    #[tokio::test]
    async fn empty_answer_is_info() {
        let (result, state, audit) = run_with(json!({})).await;
        result.unwrap();
        assert_eq!(state.safety_flag(), Some(&SafetyFlag::default()));
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn explicit_info_is_not_audited() {
        let (result, state, audit) = run_with(json!({"level": "info", "reason": ""})).await;
        result.unwrap();
        assert_eq!(state.safety_flag().unwrap().level, SafetyLevel::Info);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn escalation_is_recorded_and_audited() {
        let (result, state, audit) =
            run_with(json!({"level": "critical", "reason": "AKI risk in CKD"})).await;
        result.unwrap();
        assert_eq!(state.safety_flag().unwrap().level, SafetyLevel::Critical);

        let events = audit.entries();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::SafetyEscalation);
        assert_eq!(events[0].safety_flag.as_ref().unwrap().reason, "AKI risk in CKD");
        assert!(events[0].risk_analysis.is_some());
    }

    #[tokio::test]
    async fn invalid_level_is_schema_error() {
        let (result, state, audit) = run_with(json!({"level": "urgent", "reason": "x"})).await;
        assert!(matches!(result, Err(PipelineError::Schema { stage: TASK, .. })));
        assert!(state.safety_flag().is_none());
        assert!(audit.is_empty());
    }
}
