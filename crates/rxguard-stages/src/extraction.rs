use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rxguard_core::{
    complete_structured, CaseContext, PatientProfile, PipelineError, PipelineState,
    ProposedMedication, ReasoningRequest, ReasoningService, Sex, Stage,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::schemas::EXTRACTION_SCHEMA;

pub const TASK: &str = "extraction";
pub const RENAL_IMPAIRMENT: &str = "renal impairment";

const SYSTEM_PROMPT: &str = "You are a clinical information extraction system.

TASK:
Extract structured medical facts from the input note.

RULES:
- Do NOT provide medical advice
- Do NOT infer unstated facts
- If information is missing, use null
- Output must strictly match the JSON schema
- No explanations, no prose

NORMALIZATION RULES:
- Normalize sex to: \"male\" or \"female\"
- Normalize CKD stages to: \"Chronic Kidney Disease Stage X\"
- If CKD is present, include \"renal impairment\" in risk_factors
- Chronic diseases go in conditions
- Pain and discomfort are symptoms and must not appear in conditions

Set extraction_confidence between 0 and 1 to reflect how completely the
note specifies the patient and the medication.";

static CKD_THEN_STAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:ckd|chronic\s+kidney\s+disease)\s*(?:,|-)?\s*(?:stage\s*)?([1-5]|iv|v|i{1,3})([ab])?\b")
        .expect("ckd pattern")
});

static STAGE_THEN_CKD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bstage\s*([1-5]|iv|v|i{1,3})([ab])?\s+(?:ckd|chronic\s+kidney\s+disease)\b")
        .expect("stage pattern")
});

static CKD_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:ckd|chronic\s+kidney\s+disease)\b").expect("ckd mention pattern"));

/// Entries whose head noun is a symptom: "severe back pain", "Headache",
/// "pain in the left flank". Modifiers such as "Painful neuropathy" do not match.
static SYMPTOM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:pains?|\w*aches?|aching|discomfort)\s*$|^\s*(?:pain|aching|discomfort)\s+(?:in|of|at|on)\b)")
        .expect("symptom pattern")
});

/// Raw service answer before normalization.
#[derive(Debug, Deserialize)]
struct ExtractionAnswer {
    patient_profile: ProfileAnswer,
    #[serde(default)]
    proposed_medication: ProposedMedication,
    extraction_confidence: f64,
}

#[derive(Debug, Deserialize)]
struct ProfileAnswer {
    age: Option<u32>,
    sex: Option<String>,
    #[serde(default)]
    conditions: Vec<String>,
    #[serde(default)]
    risk_factors: Vec<String>,
}

/// Turns the raw note into a patient profile, a proposed medication and an
/// extraction confidence.
pub struct ExtractionStage {
    reasoning: Arc<dyn ReasoningService>,
    min_confidence: f64,
}

impl ExtractionStage {
    pub fn new(reasoning: Arc<dyn ReasoningService>) -> Self {
        Self {
            reasoning,
            min_confidence: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    /// Confidence below which the answer is rejected as unusable.
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }
}

#[async_trait]
impl Stage for ExtractionStage {
    fn id(&self) -> &'static str {
        "extract.profile.v1"
    }

    async fn run(&self, state: &mut PipelineState, ctx: &CaseContext) -> Result<(), PipelineError> {
        info!(case_id = %ctx.case_id, stage = self.id(), note_chars = state.raw_note().chars().count(), "extracting patient profile");

        let request = ReasoningRequest {
            task: TASK,
            system: SYSTEM_PROMPT.to_string(),
            prompt: format!("Clinical note:\n{}", state.raw_note()),
            schema: EXTRACTION_SCHEMA.clone(),
        };
        let answer: ExtractionAnswer =
            complete_structured(self.reasoning.as_ref(), TASK, &request).await?;

        let confidence = answer.extraction_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(schema_error(format!(
                "extraction_confidence {confidence} outside [0, 1]"
            )));
        }
        if confidence < self.min_confidence {
            warn!(
                case_id = %ctx.case_id,
                confidence,
                threshold = self.min_confidence,
                "extraction confidence too low"
            );
            return Err(PipelineError::Extraction {
                confidence,
                threshold: self.min_confidence,
            });
        }

        let profile = normalize_profile(answer.patient_profile)?;
        info!(
            case_id = %ctx.case_id,
            confidence,
            conditions = profile.conditions.len(),
            risk_factors = profile.risk_factors.len(),
            drug = answer.proposed_medication.drug_name.as_deref().unwrap_or("-"),
            "extraction complete"
        );

        state.record_extraction(profile, answer.proposed_medication, confidence)
    }
}

fn schema_error(message: String) -> PipelineError {
    PipelineError::Schema {
        stage: TASK,
        message,
    }
}

fn normalize_profile(raw: ProfileAnswer) -> Result<PatientProfile, PipelineError> {
    let sex = raw.sex.as_deref().map(normalize_sex).transpose()?.flatten();

    let mut conditions: Vec<String> = Vec::new();
    let mut risk_factors: Vec<String> = Vec::new();
    let mut has_ckd = false;

    for condition in raw.conditions {
        let condition = condition.trim();
        if condition.is_empty() {
            continue;
        }
        let normalized = if let Some(canonical) = canonical_ckd(condition) {
            has_ckd = true;
            canonical
        } else if CKD_MENTION.is_match(condition) {
            has_ckd = true;
            condition.to_string()
        } else if SYMPTOM.is_match(condition) {
            debug!(condition, "dropping symptom from conditions");
            continue;
        } else {
            condition.to_string()
        };
        push_unique(&mut conditions, normalized);
    }

    for factor in raw.risk_factors {
        let factor = factor.trim();
        if factor.eq_ignore_ascii_case(RENAL_IMPAIRMENT) {
            push_unique(&mut risk_factors, RENAL_IMPAIRMENT.to_string());
        } else if !factor.is_empty() {
            push_unique(&mut risk_factors, factor.to_string());
        }
    }
    if has_ckd {
        push_unique(&mut risk_factors, RENAL_IMPAIRMENT.to_string());
    }

    Ok(PatientProfile {
        age: raw.age,
        sex,
        conditions,
        risk_factors,
    })
}

fn normalize_sex(value: &str) -> Result<Option<Sex>, PipelineError> {
    match value.trim().to_lowercase().as_str() {
        "" => Ok(None),
        "m" | "male" | "man" => Ok(Some(Sex::Male)),
        "f" | "female" | "woman" => Ok(Some(Sex::Female)),
        other => Err(schema_error(format!("unrecognised sex {other:?}"))),
    }
}

/// "Stage 3 CKD", "CKD3", "chronic kidney disease stage IIIb" → canonical form.
fn canonical_ckd(condition: &str) -> Option<String> {
    let caps = CKD_THEN_STAGE
        .captures(condition)
        .or_else(|| STAGE_THEN_CKD.captures(condition))?;
    let stage = stage_number(caps.get(1)?.as_str())?;
    let sub = caps
        .get(2)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();
    Some(format!("Chronic Kidney Disease Stage {stage}{sub}"))
}

fn stage_number(raw: &str) -> Option<u8> {
    match raw.to_lowercase().as_str() {
        "1" | "i" => Some(1),
        "2" | "ii" => Some(2),
        "3" | "iii" => Some(3),
        "4" | "iv" => Some(4),
        "5" | "v" => Some(5),
        _ => None,
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
        list.push(value);
    }
}
