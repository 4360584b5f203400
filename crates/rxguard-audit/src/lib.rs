//! RxGuard Audit: immutable records of safety-relevant case transitions
//!
//! ```text
//! safety critic (warning/critical) ─┐
//!                                   ├─→ AuditEvent ─→ AuditSink (log, tracing, fan-out)
//! report stage (every completion) ──┘
//! ```
//!
//! # Example
//!
//! ```
//! use rxguard_audit::{AuditEvent, AuditEventType, AuditLog, AuditSink};
//! use rxguard_core::PipelineState;
//! use uuid::Uuid;
//!
//! let log = AuditLog::new();
//! let state = PipelineState::new("65M, Stage 3 CKD");
//! log.record(AuditEvent::from_state(AuditEventType::ClinicalReportGenerated, Uuid::new_v4(), &state));
//! assert_eq!(log.stats().reports, 1);
//! ```

pub mod audit;
pub mod sink;

pub use audit::{AuditEvent, AuditEventType, AuditLog, AuditStats};
pub use sink::{AuditSink, FanoutSink, TracingAuditSink};
