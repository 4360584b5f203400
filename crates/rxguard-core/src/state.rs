//! Case state threaded through the stages.
//!
//! Fields are populated forward-only: each setter refuses to overwrite a
//! field and refuses to run before the fields it depends on are present.
use serde::{Deserialize, Serialize};

use crate::data_model::{
    FinalReport, GuidelinePassage, PatientProfile, ProposedMedication, RiskAnalysis, SafetyFlag,
};
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    raw_note: String,
    patient_profile: Option<PatientProfile>,
    proposed_medication: Option<ProposedMedication>,
    confidence: Option<f64>,
    retrieved_guidelines: Option<Vec<GuidelinePassage>>,
    risk_analysis: Option<RiskAnalysis>,
    safety_flag: Option<SafetyFlag>,
    final_report: Option<FinalReport>,
}

impl PipelineState {
    pub fn new(raw_note: impl Into<String>) -> Self {
        Self {
            raw_note: raw_note.into(),
            patient_profile: None,
            proposed_medication: None,
            confidence: None,
            retrieved_guidelines: None,
            risk_analysis: None,
            safety_flag: None,
            final_report: None,
        }
    }

    pub fn raw_note(&self) -> &str {
        &self.raw_note
    }

    pub fn patient_profile(&self) -> Option<&PatientProfile> {
        self.patient_profile.as_ref()
    }

    pub fn proposed_medication(&self) -> Option<&ProposedMedication> {
        self.proposed_medication.as_ref()
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn retrieved_guidelines(&self) -> Option<&[GuidelinePassage]> {
        self.retrieved_guidelines.as_deref()
    }

    pub fn risk_analysis(&self) -> Option<&RiskAnalysis> {
        self.risk_analysis.as_ref()
    }

    pub fn safety_flag(&self) -> Option<&SafetyFlag> {
        self.safety_flag.as_ref()
    }

    pub fn final_report(&self) -> Option<&FinalReport> {
        self.final_report.as_ref()
    }

    /// True once the report stage has rendered a report.
    pub fn is_complete(&self) -> bool {
        self.final_report.is_some()
    }

    pub fn record_extraction(
        &mut self,
        profile: PatientProfile,
        medication: ProposedMedication,
        confidence: f64,
    ) -> Result<(), PipelineError> {
        if self.patient_profile.is_some() || self.proposed_medication.is_some() || self.confidence.is_some() {
            return Err(already_set("extraction"));
        }
        check_confidence(confidence)?;
        self.patient_profile = Some(profile);
        self.proposed_medication = Some(medication);
        self.confidence = Some(confidence);
        Ok(())
    }

    pub fn record_guidelines(&mut self, passages: Vec<GuidelinePassage>) -> Result<(), PipelineError> {
        if self.retrieved_guidelines.is_some() {
            return Err(already_set("retrieved_guidelines"));
        }
        self.require_extraction("retrieved_guidelines")?;
        self.retrieved_guidelines = Some(passages);
        Ok(())
    }

    pub fn record_risk_analysis(&mut self, analysis: RiskAnalysis) -> Result<(), PipelineError> {
        if self.risk_analysis.is_some() {
            return Err(already_set("risk_analysis"));
        }
        if self.retrieved_guidelines.is_none() {
            return Err(out_of_order("risk_analysis", "retrieved_guidelines"));
        }
        self.risk_analysis = Some(analysis);
        Ok(())
    }

    pub fn record_safety_flag(&mut self, flag: SafetyFlag) -> Result<(), PipelineError> {
        if self.safety_flag.is_some() {
            return Err(already_set("safety_flag"));
        }
        if self.risk_analysis.is_none() {
            return Err(out_of_order("safety_flag", "risk_analysis"));
        }
        self.safety_flag = Some(flag);
        Ok(())
    }

    pub fn record_final_report(&mut self, report: FinalReport) -> Result<(), PipelineError> {
        if self.final_report.is_some() {
            return Err(already_set("final_report"));
        }
        if self.safety_flag.is_none() {
            return Err(out_of_order("final_report", "safety_flag"));
        }
        self.final_report = Some(report);
        Ok(())
    }

    /// Check the forward-only invariant: no field is set while a field
    /// earlier in the stage order is unset.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let extracted = [
            self.patient_profile.is_some(),
            self.proposed_medication.is_some(),
            self.confidence.is_some(),
        ];
        if extracted.iter().any(|s| *s) && !extracted.iter().all(|s| *s) {
            return Err(PipelineError::StateInvariant(
                "extraction fields are partially populated".to_string(),
            ));
        }
        if let Some(confidence) = self.confidence {
            check_confidence(confidence)?;
        }

        let order = [
            ("extraction", self.confidence.is_some()),
            ("retrieved_guidelines", self.retrieved_guidelines.is_some()),
            ("risk_analysis", self.risk_analysis.is_some()),
            ("safety_flag", self.safety_flag.is_some()),
            ("final_report", self.final_report.is_some()),
        ];
        for pair in order.windows(2) {
            let (earlier, earlier_set) = pair[0];
            let (later, later_set) = pair[1];
            if later_set && !earlier_set {
                return Err(out_of_order(later, earlier));
            }
        }
        Ok(())
    }

    fn require_extraction(&self, field: &str) -> Result<(), PipelineError> {
        if self.confidence.is_none() {
            return Err(out_of_order(field, "extraction"));
        }
        Ok(())
    }
}

fn check_confidence(confidence: f64) -> Result<(), PipelineError> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(PipelineError::StateInvariant(format!(
            "confidence {} outside [0, 1]",
            confidence
        )));
    }
    Ok(())
}

fn already_set(field: &str) -> PipelineError {
    PipelineError::StateInvariant(format!("{} is already set", field))
}

fn out_of_order(field: &str, missing: &str) -> PipelineError {
    PipelineError::StateInvariant(format!("{} set before {}", field, missing))
}
