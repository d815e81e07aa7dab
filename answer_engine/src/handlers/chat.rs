//! Chat handler
//!
//! The request facade: validates bounds before any external call, applies
//! the per-request deadline, and surfaces structured errors.

use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::{error, info};

use crate::errors::ApiError;
use crate::models::{AppState, ChatRequest, ChatResponse};

/// POST /chat
///
/// Runs the full classify → retrieve → assemble → generate → persist
/// pipeline for one question.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    request.validate()?;

    info!(
        k = request.k,
        conversation = request.conversation_id.as_deref().unwrap_or("-"),
        "chat request: '{}'",
        request.query
    );

    let deadline = state.settings.request_deadline;
    let response = tokio::time::timeout(deadline, state.orchestrator.handle(request))
        .await
        .map_err(|_| {
            error!("request exceeded the {}ms deadline", deadline.as_millis());
            ApiError::DeadlineExceeded
        })??;

    info!(
        routing = %response.routing,
        duration_ms = response.processing_time_ms,
        sources = response.sources.len(),
        "chat request complete"
    );

    Ok(Json(response))
}
