//! Audit trail generation
//!
//! Records every safety-relevant transition of a case for compliance and
//! later review. Events are append-only and never read back by the pipeline.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rxguard_core::{PatientProfile, PipelineState, ProposedMedication, RiskAnalysis, SafetyFlag, SafetyLevel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sink::AuditSink;

/// An audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: String,

    pub timestamp: DateTime<Utc>,

    pub event_type: AuditEventType,

    /// Case this event belongs to
    pub case_id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_context: Option<PatientProfile>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub medication_context: Option<ProposedMedication>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_analysis: Option<RiskAnalysis>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_flag: Option<SafetyFlag>,

    /// Resolved alert level (terminal report events only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<String>,
}

impl AuditEvent {
    /// Snapshot the clinical context of `state` into a new event.
    pub fn from_state(event_type: AuditEventType, case_id: Uuid, state: &PipelineState) -> Self {
        Self {
            id: generate_audit_id(),
            timestamp: Utc::now(),
            event_type,
            case_id,
            patient_context: state.patient_profile().cloned(),
            medication_context: state.proposed_medication().cloned(),
            risk_analysis: state.risk_analysis().cloned(),
            safety_flag: state.safety_flag().cloned(),
            alert_level: None,
        }
    }

    pub fn with_alert_level(mut self, alert_level: impl Into<String>) -> Self {
        self.alert_level = Some(alert_level.into());
        self
    }

    fn safety_level(&self) -> Option<SafetyLevel> {
        self.safety_flag.as_ref().map(|f| f.level)
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Safety critic raised a warning or critical flag
    SafetyEscalation,
    /// A case completed with a rendered report
    ClinicalReportGenerated,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SafetyEscalation => "safety_escalation",
            AuditEventType::ClinicalReportGenerated => "clinical_report_generated",
        }
    }
}

/// Bounded in-memory audit log
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEvent>>,
    max_entries: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_max_entries(10000)
    }

    /// Create with a custom max size
    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: max.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEvent>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn entries(&self) -> Vec<AuditEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn entries_for_case(&self, case_id: Uuid) -> Vec<AuditEvent> {
        self.lock()
            .iter()
            .filter(|e| e.case_id == case_id)
            .cloned()
            .collect()
    }

    pub fn entries_of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.lock())
    }

    /// Export to JSON Lines
    pub fn to_jsonl(&self) -> String {
        self.lock()
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn stats(&self) -> AuditStats {
        let entries = self.lock();
        let total = entries.len();
        let escalations = entries
            .iter()
            .filter(|e| e.event_type == AuditEventType::SafetyEscalation)
            .count();
        let reports = entries
            .iter()
            .filter(|e| e.event_type == AuditEventType::ClinicalReportGenerated)
            .count();
        let critical_reports = entries
            .iter()
            .filter(|e| {
                e.event_type == AuditEventType::ClinicalReportGenerated
                    && e.safety_level() == Some(SafetyLevel::Critical)
            })
            .count();

        AuditStats {
            total,
            escalations,
            reports,
            critical_reports,
            escalation_rate: if reports > 0 { escalations as f64 / reports as f64 } else { 0.0 },
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: AuditEvent) {
        let mut entries = self.lock();
        entries.push_back(event);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }
}

/// Statistics about audit entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: usize,
    pub escalations: usize,
    pub reports: usize,
    pub critical_reports: usize,
    /// Escalations per completed report
    pub escalation_rate: f64,
}

fn generate_audit_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("aud_{:x}_{:04x}", timestamp, counter % 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxguard_core::{EvidenceCitation, RiskLevel, Sex};

    fn reported_state(level: SafetyLevel) -> PipelineState {
        let mut state = PipelineState::new("65M on ibuprofen");
        state
            .record_extraction(
                PatientProfile {
                    age: Some(65),
                    sex: Some(Sex::Male),
                    conditions: vec![],
                    risk_factors: vec![],
                },
                ProposedMedication::default(),
                0.9,
            )
            .unwrap();
        state.record_guidelines(vec![]).unwrap();
        state
            .record_risk_analysis(RiskAnalysis {
                summary: "s".to_string(),
                mechanism: "m".to_string(),
                evidence: vec![EvidenceCitation { source: "a".to_string(), page: 1 }],
                risk_level: RiskLevel::High,
            })
            .unwrap();
        state
            .record_safety_flag(SafetyFlag { level, reason: "r".to_string() })
            .unwrap();
        state
    }

    #[test]
    fn test_event_snapshots_state() {
        let case_id = Uuid::new_v4();
        let state = reported_state(SafetyLevel::Warning);
        let event = AuditEvent::from_state(AuditEventType::SafetyEscalation, case_id, &state);

        assert!(event.id.starts_with("aud_"));
        assert_eq!(event.case_id, case_id);
        assert_eq!(event.patient_context.as_ref().and_then(|p| p.age), Some(65));
        assert_eq!(event.safety_flag.as_ref().map(|f| f.level), Some(SafetyLevel::Warning));
        assert!(event.alert_level.is_none());
    }

    #[test]
    fn test_log_filters_and_stats() {
        let log = AuditLog::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let critical = reported_state(SafetyLevel::Critical);
        log.record(AuditEvent::from_state(AuditEventType::SafetyEscalation, a, &critical));
        log.record(
            AuditEvent::from_state(AuditEventType::ClinicalReportGenerated, a, &critical)
                .with_alert_level("CRITICAL"),
        );
        let info = reported_state(SafetyLevel::Info);
        log.record(
            AuditEvent::from_state(AuditEventType::ClinicalReportGenerated, b, &info)
                .with_alert_level("INFO"),
        );

        assert_eq!(log.len(), 3);
        assert_eq!(log.entries_for_case(a).len(), 2);
        assert_eq!(log.entries_of_type(AuditEventType::ClinicalReportGenerated).len(), 2);

        let stats = log.stats();
        assert_eq!(stats.escalations, 1);
        assert_eq!(stats.reports, 2);
        assert_eq!(stats.critical_reports, 1);
        assert!((stats.escalation_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_log_max_entries() {
        let log = AuditLog::with_max_entries(5);
        let state = reported_state(SafetyLevel::Info);
        let mut last = Uuid::nil();
        for _ in 0..10 {
            last = Uuid::new_v4();
            log.record(AuditEvent::from_state(AuditEventType::ClinicalReportGenerated, last, &state));
        }

        // Should only keep last 5
        assert_eq!(log.len(), 5);
        assert_eq!(log.entries().last().map(|e| e.case_id), Some(last));
    }

    #[test]
    fn test_jsonl_export() {
        let log = AuditLog::new();
        let state = reported_state(SafetyLevel::Info);
        log.record(AuditEvent::from_state(AuditEventType::ClinicalReportGenerated, Uuid::new_v4(), &state));
        log.record(AuditEvent::from_state(AuditEventType::ClinicalReportGenerated, Uuid::new_v4(), &state));

        let jsonl = log.to_jsonl();
        assert_eq!(jsonl.lines().count(), 2);
        let first: AuditEvent = serde_json::from_str(jsonl.lines().next().unwrap()).unwrap();
        assert_eq!(first.event_type, AuditEventType::ClinicalReportGenerated);
    }
}
