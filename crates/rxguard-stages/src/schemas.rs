//! Target JSON schemas handed to the reasoning service with each prompt.
use once_cell::sync::Lazy;
use serde_json::{json, Value};

pub static EXTRACTION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["patient_profile", "proposed_medication", "extraction_confidence"],
        "properties": {
            "patient_profile": {
                "type": "object",
                "properties": {
                    "age": {"type": ["integer", "null"]},
                    "sex": {"type": ["string", "null"], "enum": ["male", "female", null]},
                    "conditions": {"type": "array", "items": {"type": "string"}},
                    "risk_factors": {"type": "array", "items": {"type": "string"}}
                }
            },
            "proposed_medication": {
                "type": "object",
                "properties": {
                    "drug_name": {"type": ["string", "null"]},
                    "dose_mg_per_unit": {"type": ["integer", "null"]},
                    "frequency_per_day": {"type": ["integer", "null"]},
                    "duration_days": {"type": ["integer", "null"]},
                    "total_daily_dose_mg": {"type": ["integer", "null"]}
                }
            },
            "extraction_confidence": {"type": "number", "minimum": 0, "maximum": 1}
        }
    })
});

pub static RISK_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["summary", "mechanism", "evidence", "risk_level"],
        "properties": {
            "summary": {"type": "string"},
            "mechanism": {"type": "string"},
            "evidence": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["source", "page"],
                    "properties": {
                        "source": {"type": "string"},
                        "page": {"type": "integer"}
                    }
                }
            },
            "risk_level": {"type": "string", "enum": ["low", "moderate", "high"]}
        }
    })
});

pub static SAFETY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["level", "reason"],
        "properties": {
            "level": {"type": "string", "enum": ["info", "warning", "critical"]},
            "reason": {"type": "string"}
        }
    })
});
