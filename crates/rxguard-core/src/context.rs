//! Case Context: identity and metadata of one case execution
use std::collections::HashMap;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CaseContext {
    pub case_id: Uuid,
    /// Correlation id supplied by the caller (e.g. an HTTP request id).
    pub trace_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl CaseContext {
    pub fn new() -> Self {
        Self {
            case_id: Uuid::new_v4(),
            trace_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

impl Default for CaseContext {
    fn default() -> Self {
        Self::new()
    }
}
