//! Conversation endpoints
//!
//! CRUD surface over the conversation store:
//! - POST   /conversations               create
//! - GET    /conversations               list (filter by status, paginated)
//! - GET    /conversations/:id           metadata
//! - GET    /conversations/:id/messages  metadata plus turns
//! - PUT    /conversations/:id           update title and/or status
//! - DELETE /conversations/:id           soft delete

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::errors::ApiError;
use crate::models::{
    AppState, Conversation, ConversationStatus, ConversationSummary, Interaction,
};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConversationWithMessages {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Interaction>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversation {
    pub title: Option<String>,
    pub status: Option<String>,
}

/// POST /conversations
pub async fn create(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state.conversation_writer.start_conversation().await?;
    info!(conversation_id = %conversation.id, "conversation created");
    Ok(Json(conversation))
}

/// GET /conversations?status=&limit=&offset=
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(|raw| {
            ConversationStatus::parse(raw)
                .ok_or_else(|| ApiError::InvalidInput(format!("unknown status: {raw}")))
        })
        .transpose()?;

    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let summaries = state.conversation_reader.list(status, limit, offset).await?;
    Ok(Json(summaries))
}

/// GET /conversations/:id
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = fetch_visible(&state, &id).await?;
    Ok(Json(conversation))
}

/// GET /conversations/:id/messages
pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationWithMessages>, ApiError> {
    let conversation = fetch_visible(&state, &id).await?;
    let messages = state.conversation_reader.messages(&id).await?;
    Ok(Json(ConversationWithMessages {
        conversation,
        messages,
    }))
}

/// PUT /conversations/:id
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<UpdateConversation>,
) -> Result<Json<Conversation>, ApiError> {
    fetch_visible(&state, &id).await?;

    if let Some(title) = &update.title {
        if title.trim().is_empty() {
            return Err(ApiError::InvalidInput("title must not be blank".to_string()));
        }
        state.conversation_writer.rename(&id, title.trim()).await?;
    }

    if let Some(raw) = &update.status {
        let status = ConversationStatus::parse(raw)
            .ok_or_else(|| ApiError::InvalidInput(format!("unknown status: {raw}")))?;
        state.conversation_writer.set_status(&id, status).await?;
    }

    let conversation = state
        .conversation_reader
        .fetch(&id)
        .await?
        .ok_or_else(|| ApiError::ConversationNotFound(id.clone()))?;
    Ok(Json(conversation))
}

/// DELETE /conversations/:id
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    fetch_visible(&state, &id).await?;
    state
        .conversation_writer
        .set_status(&id, ConversationStatus::Deleted)
        .await?;
    info!(conversation_id = %id, "conversation soft-deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Fetch a conversation, treating soft-deleted ones as absent.
async fn fetch_visible(state: &AppState, id: &str) -> Result<Conversation, ApiError> {
    match state.conversation_reader.fetch(id).await? {
        Some(c) if c.status != ConversationStatus::Deleted => Ok(c),
        _ => Err(ApiError::ConversationNotFound(id.to_string())),
    }
}
