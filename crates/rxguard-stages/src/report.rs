use std::sync::Arc;

use async_trait::async_trait;
use rxguard_audit::{AuditEvent, AuditEventType, AuditSink};
use rxguard_core::{
    CaseContext, FinalReport, PatientProfile, PipelineError, PipelineState, RiskAnalysis,
    SafetyFlag, Stage,
};
use tracing::info;

/// Render the final report from the upstream stage outputs.
///
/// `confidence` is the title-cased risk level, see [`FinalReport`].
pub fn render_report(profile: &PatientProfile, analysis: &RiskAnalysis, flag: &SafetyFlag) -> FinalReport {
    FinalReport {
        alert_level: flag.level.alert_label().to_string(),
        patient_context: patient_context(profile),
        identified_risk: format!(
            "{} Mechanism: {}.",
            analysis.summary.trim(),
            analysis.mechanism.trim().trim_end_matches('.')
        ),
        guideline_evidence: analysis
            .evidence
            .iter()
            .map(|e| format!("{} (page {})", e.source, e.page))
            .collect(),
        confidence: analysis.risk_level.title_case().to_string(),
    }
}

fn patient_context(profile: &PatientProfile) -> String {
    let subject = match (profile.age, profile.sex) {
        (Some(age), Some(sex)) => format!("{age} year old {sex}"),
        (Some(age), None) => format!("{age} year old patient"),
        (None, Some(sex)) => format!("{sex} of unknown age"),
        (None, None) => "Patient of unknown age".to_string(),
    };
    if profile.conditions.is_empty() {
        format!("{subject} with no documented conditions")
    } else {
        format!("{subject} with {}", profile.conditions.join(", "))
    }
}

/// Deterministic final stage: renders the report and always writes one
/// terminal audit record.
pub struct ReportStage {
    audit: Arc<dyn AuditSink>,
}

impl ReportStage {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn id(&self) -> &'static str {
        "report.clinical.v1"
    }

    fn deterministic(&self) -> bool {
        true
    }

    async fn run(&self, state: &mut PipelineState, ctx: &CaseContext) -> Result<(), PipelineError> {
        let (Some(profile), Some(analysis), Some(flag)) =
            (state.patient_profile(), state.risk_analysis(), state.safety_flag())
        else {
            return Err(PipelineError::StateInvariant(
                "report requires profile, risk analysis and safety flag".to_string(),
            ));
        };

        let report = render_report(profile, analysis, flag);
        let alert_level = report.alert_level.clone();
        state.record_final_report(report)?;

        self.audit.record(
            AuditEvent::from_state(AuditEventType::ClinicalReportGenerated, ctx.case_id, state)
                .with_alert_level(alert_level.clone()),
        );
        info!(case_id = %ctx.case_id, stage = self.id(), alert_level = %alert_level, "report generated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxguard_audit::AuditLog;
    use rxguard_core::{EvidenceCitation, ProposedMedication, RiskLevel, SafetyLevel, Sex};

    fn analysis() -> RiskAnalysis {
        RiskAnalysis {
            summary: "High risk of acute kidney injury.".into(),
            mechanism: "NSAIDs constrict afferent arterioles.".into(),
            evidence: vec![
                EvidenceCitation { source: "kdigo.txt".into(), page: 4 },
                EvidenceCitation { source: "bnf.txt".into(), page: 0 },
            ],
            risk_level: RiskLevel::Moderate,
        }
    }

    fn profile() -> PatientProfile {
        PatientProfile {
            age: Some(65),
            sex: Some(Sex::Male),
            conditions: vec!["Chronic Kidney Disease Stage 3".into(), "Hypertension".into()],
            risk_factors: vec!["renal impairment".into()],
        }
    }

    #[test]
    fn renders_every_field() {
        let flag = SafetyFlag { level: SafetyLevel::Warning, reason: "r".into() };
        let report = render_report(&profile(), &analysis(), &flag);
        assert_eq!(report.alert_level, "WARNING");
        assert_eq!(
            report.patient_context,
            "65 year old male with Chronic Kidney Disease Stage 3, Hypertension"
        );
        assert_eq!(
            report.identified_risk,
            "High risk of acute kidney injury. Mechanism: NSAIDs constrict afferent arterioles."
        );
        assert_eq!(report.guideline_evidence, vec!["kdigo.txt (page 4)", "bnf.txt (page 0)"]);
        assert_eq!(report.confidence, "Moderate");
    }

    #[test]
    fn missing_demographics_are_spelled_out() {
        let bare = PatientProfile::default();
        assert_eq!(patient_context(&bare), "Patient of unknown age with no documented conditions");
        let female = PatientProfile { sex: Some(Sex::Female), ..Default::default() };
        assert!(patient_context(&female).starts_with("female of unknown age"));
    }

    #[tokio::test]
    async fn info_case_still_emits_terminal_event() {
        let mut state = PipelineState::new("note");
        state.record_extraction(profile(), ProposedMedication::default(), 0.9).unwrap();
        state.record_guidelines(vec![]).unwrap();
        state.record_risk_analysis(analysis()).unwrap();
        state.record_safety_flag(SafetyFlag::default()).unwrap();

        let audit = Arc::new(AuditLog::new());
        let ctx = CaseContext::new();
        ReportStage::new(audit.clone()).run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.final_report().unwrap().alert_level, "INFO");
        let events = audit.entries();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::ClinicalReportGenerated);
        assert_eq!(events[0].alert_level.as_deref(), Some("INFO"));
        assert_eq!(events[0].case_id, ctx.case_id);
    }

    #[tokio::test]
    async fn refuses_without_safety_flag() {
        let mut state = PipelineState::new("note");
        let audit = Arc::new(AuditLog::new());
        let result = ReportStage::new(audit.clone()).run(&mut state, &CaseContext::new()).await;
        assert!(matches!(result, Err(PipelineError::StateInvariant(_))));
        assert!(audit.is_empty());
    }
}
