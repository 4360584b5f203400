//! API Handlers
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use rxguard_core::{CaseContext, FinalReport, PipelineError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::metrics::CaseOutcome;
use crate::AppState;

pub const MIN_NOTE_CHARS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub raw_note: String,
}

fn low_confidence(confidence: Option<f64>) -> String {
    let shown = confidence
        .map(|c| format!("{c:.2}"))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Could not extract clinical information with sufficient confidence \
         (confidence: {shown}). Please provide a clearer note."
    )
}

pub async fn check(
    State(state): State<AppState>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<FinalReport>, ApiError> {
    let started = Instant::now();
    let finish = |outcome: CaseOutcome| state.metrics.record(outcome, started.elapsed().as_secs_f64());

    let Json(request) = payload.map_err(|rejection| {
        finish(CaseOutcome::Rejected);
        ApiError::unprocessable(rejection.body_text())
    })?;

    if request.raw_note.trim().chars().count() < MIN_NOTE_CHARS {
        finish(CaseOutcome::Rejected);
        return Err(ApiError::unprocessable(format!(
            "raw_note must contain at least {MIN_NOTE_CHARS} characters"
        )));
    }

    let ctx = CaseContext::new();
    let preview: String = request.raw_note.chars().take(50).collect();
    info!(case_id = %ctx.case_id, note_preview = %preview, "received clinical note");

    match state.pipeline.run_case(&request.raw_note, ctx).await {
        Ok(run) => match run.state.final_report() {
            Some(report) => {
                finish(CaseOutcome::Completed);
                info!(case_id = %run.case_id, alert_level = %report.alert_level, "report returned");
                Ok(Json(report.clone()))
            }
            None => {
                finish(CaseOutcome::Halted);
                Err(ApiError::bad_request(low_confidence(run.state.confidence())))
            }
        },
        Err(failure) => match failure.error {
            PipelineError::Extraction { confidence, .. } => {
                finish(CaseOutcome::Failed);
                warn!(case_id = %failure.case_id, confidence, "extraction rejected note");
                Err(ApiError::internal(format!("Processing error: {}", failure.error)))
            }
            PipelineError::Validation(ref message) => {
                finish(CaseOutcome::Rejected);
                Err(ApiError::unprocessable(message.clone()))
            }
            ref other => {
                finish(CaseOutcome::Failed);
                error!(
                    case_id = %failure.case_id,
                    stage = failure.stage,
                    kind = other.kind(),
                    error = %other,
                    "case processing failed"
                );
                Err(ApiError::internal(format!("Processing error: {other}")))
            }
        },
    }
}

pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy", "service": "rxguard" })))
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .encode()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
