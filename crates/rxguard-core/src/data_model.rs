//! Data Model: patient, medication, guideline, risk and report records
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposedMedication {
    pub drug_name: Option<String>,
    pub dose_mg_per_unit: Option<u32>,
    pub frequency_per_day: Option<u32>,
    pub duration_days: Option<u32>,
    pub total_daily_dose_mg: Option<u32>,
}

/// A reference passage as returned by the retrieval service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelinePassage {
    pub source: String,
    pub page: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceCitation {
    pub source: String,
    pub page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        }
    }

    /// "Low", "Moderate", "High".
    pub fn title_case(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub summary: String,
    pub mechanism: String,
    pub evidence: Vec<EvidenceCitation>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    #[default]
    Info,
    Warning,
    Critical,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Info => "info",
            SafetyLevel::Warning => "warning",
            SafetyLevel::Critical => "critical",
        }
    }

    pub fn is_escalation(&self) -> bool {
        !matches!(self, SafetyLevel::Info)
    }

    /// "INFO", "WARNING", "CRITICAL".
    pub fn alert_label(&self) -> &'static str {
        match self {
            SafetyLevel::Info => "INFO",
            SafetyLevel::Warning => "WARNING",
            SafetyLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFlag {
    pub level: SafetyLevel,
    pub reason: String,
}

/// Rendered outcome of a completed case.
///
/// `confidence` carries the title-cased risk level of the analysis, not the
/// extraction confidence used by the gate. The field name is kept for
/// compatibility with existing consumers even though it is misleading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub alert_level: String,
    pub patient_context: String,
    pub identified_risk: String,
    pub guideline_evidence: Vec<String>,
    pub confidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProof {
    pub id: String,
    /// `blake3:` digest of the serialized state after the stage ran.
    pub state_hash: String,
    pub deterministic: bool,
    pub latency_ms: u64,
}
