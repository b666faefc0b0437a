//! Runtime inspection and manual escalation of log verbosity

use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::buffer::ContextSummary;
use crate::controller::{TriggerOutcome, VerbosityStatus};
use crate::error::AppError;
use crate::metrics::TelemetrySnapshot;
use crate::pipeline::LogPipeline;

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub outcome: TriggerOutcome,
    pub status: VerbosityStatus,
}

#[derive(Debug, Serialize)]
pub struct BufferStatus {
    pub contexts: usize,
    pub max_contexts: usize,
    pub capacity_per_context: usize,
}

#[derive(Debug, Serialize)]
pub struct LogLevelResponse {
    pub status: VerbosityStatus,
    pub buffer: Option<BufferStatus>,
    pub pending_signals: usize,
    pub telemetry: TelemetrySnapshot,
}

/// POST /log-level/trigger - escalate verbosity as if an error had been logged
pub async fn trigger(
    State(pipeline): State<Arc<LogPipeline>>,
) -> Result<Json<TriggerResponse>, AppError> {
    let controller = pipeline.controller();
    if controller.is_shut_down() {
        return Err(AppError::Unavailable(
            "verbosity controller is shut down".to_string(),
        ));
    }

    let outcome = controller.trigger();
    tracing::info!(?outcome, "Manual escalation requested");

    Ok(Json(TriggerResponse {
        outcome,
        status: controller.status(),
    }))
}

/// GET /log-level - current verbosity state and counters
pub async fn status(State(pipeline): State<Arc<LogPipeline>>) -> Json<LogLevelResponse> {
    let buffer = pipeline.buffer().map(|b| BufferStatus {
        contexts: b.context_count(),
        max_contexts: b.max_contexts(),
        capacity_per_context: b.capacity_per_context(),
    });

    Json(LogLevelResponse {
        status: pipeline.controller().status(),
        buffer,
        pending_signals: pipeline.decoupler().pending(),
        telemetry: pipeline.telemetry().snapshot(),
    })
}

/// GET /log-level/contexts - buffered contexts, most recently used first
pub async fn contexts(
    State(pipeline): State<Arc<LogPipeline>>,
) -> Result<Json<Vec<ContextSummary>>, AppError> {
    let buffer = pipeline
        .buffer()
        .ok_or_else(|| AppError::Unavailable("pre-error buffering is disabled".to_string()))?;
    Ok(Json(buffer.contexts()))
}
