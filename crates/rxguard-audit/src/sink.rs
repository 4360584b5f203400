//! Audit sinks: where audit events go.
use std::sync::Arc;

use crate::audit::AuditEvent;

/// Receiver of audit events. Recording must not fail the case.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn record(&self, event: AuditEvent) {
        (**self).record(event)
    }
}

/// Writes each event as a structured `clinical_event` log record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        tracing::info!(
            target: "rxguard::audit",
            clinical_event = true,
            event_type = event.event_type.as_str(),
            case_id = %event.case_id,
            audit_id = %event.id,
            alert_level = event.alert_level.as_deref().unwrap_or(""),
            payload = %payload,
            "audit event"
        );
    }
}

/// Forwards every event to each inner sink, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AuditSink for FanoutSink {
    fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}
