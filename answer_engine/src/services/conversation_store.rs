//! Conversation Store
//!
//! Persistent conversations and turns. The orchestrator depends on two
//! narrow capabilities — [`ConversationReader`] for history and
//! [`ConversationWriter`] for appends — both implemented by the Postgres
//! store. This module never imports the orchestrator.
//!
//! Turn numbering is serialized per conversation with a row lock: two
//! concurrent appends on the same conversation commit in arrival order and
//! always yield contiguous turn numbers.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Conversation, ConversationStatus, ConversationSummary, HistoryTurn, Interaction,
};

/// Title budget when deriving from the first user query.
const TITLE_CHARS: usize = 47;

/// Read access to conversations and their turns.
#[async_trait]
pub trait ConversationReader: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<Conversation>>;

    /// The most recent `limit` turns, in increasing turn order.
    async fn history(&self, id: &str, limit: usize) -> Result<Vec<HistoryTurn>>;

    async fn list(
        &self,
        status: Option<ConversationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversationSummary>>;

    async fn messages(&self, id: &str) -> Result<Vec<Interaction>>;
}

/// Write access to conversations.
#[async_trait]
pub trait ConversationWriter: Send + Sync {
    /// Create an active conversation with an empty title.
    async fn start_conversation(&self) -> Result<Conversation>;

    /// Append a turn, assigning the next turn number atomically. Sets the
    /// conversation title from the first query and bumps `updated_at`.
    async fn append_interaction(
        &self,
        conversation_id: &str,
        query: &str,
        response: &str,
        sources: &[String],
        processing_time_ms: u64,
    ) -> Result<i32>;

    async fn rename(&self, id: &str, title: &str) -> Result<bool>;

    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<bool>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    title: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_model(self) -> Result<Conversation> {
        let status = ConversationStatus::parse(&self.status)
            .with_context(|| format!("conversation {} has unknown status {}", self.id, self.status))?;
        Ok(Conversation {
            id: self.id,
            title: self.title,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: String,
    title: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    message_count: i64,
}

#[derive(sqlx::FromRow)]
struct InteractionRow {
    id: String,
    conversation_id: String,
    turn_number: i32,
    query: String,
    response: String,
    sources: Vec<String>,
    processing_time_ms: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    turn_number: i32,
    query: String,
    response: String,
}

pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await
            .context("failed to connect conversation store")?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Derive a conversation title from its first user query: the first 47
/// characters, with an ellipsis when the query is longer.
pub fn derive_title(query: &str) -> String {
    let trimmed = query.trim();
    let truncated: String = trimmed.chars().take(TITLE_CHARS).collect();
    if trimmed.chars().count() > TITLE_CHARS {
        format!("{truncated}...")
    } else {
        truncated
    }
}

#[async_trait]
impl ConversationReader for PgConversationStore {
    async fn fetch(&self, id: &str) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT id, title, status, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch conversation")?;

        row.map(ConversationRow::into_model).transpose()
    }

    async fn history(&self, id: &str, limit: usize) -> Result<Vec<HistoryTurn>> {
        let mut rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT turn_number, query, response FROM interactions \
             WHERE conversation_id = $1 ORDER BY turn_number DESC LIMIT $2",
        )
        .bind(id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch history")?;

        rows.reverse();
        Ok(rows
            .into_iter()
            .map(|r| HistoryTurn {
                turn_number: r.turn_number,
                query: r.query,
                response: r.response,
            })
            .collect())
    }

    async fn list(
        &self,
        status: Option<ConversationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversationSummary>> {
        let rows: Vec<SummaryRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT c.id, c.title, c.status, c.created_at, c.updated_at, \
                            COUNT(i.id) AS message_count \
                     FROM conversations c \
                     LEFT JOIN interactions i ON i.conversation_id = c.id \
                     WHERE c.status = $1 \
                     GROUP BY c.id ORDER BY c.updated_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(
                    "SELECT c.id, c.title, c.status, c.created_at, c.updated_at, \
                            COUNT(i.id) AS message_count \
                     FROM conversations c \
                     LEFT JOIN interactions i ON i.conversation_id = c.id \
                     WHERE c.status != 'deleted' \
                     GROUP BY c.id ORDER BY c.updated_at DESC LIMIT $1 OFFSET $2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("failed to list conversations")?;

        rows.into_iter()
            .map(|r| {
                let status = ConversationStatus::parse(&r.status).with_context(|| {
                    format!("conversation {} has unknown status {}", r.id, r.status)
                })?;
                Ok(ConversationSummary {
                    id: r.id,
                    title: r.title,
                    status,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                    message_count: r.message_count,
                })
            })
            .collect()
    }

    async fn messages(&self, id: &str) -> Result<Vec<Interaction>> {
        let rows: Vec<InteractionRow> = sqlx::query_as(
            "SELECT id, conversation_id, turn_number, query, response, sources, \
                    processing_time_ms, created_at \
             FROM interactions WHERE conversation_id = $1 ORDER BY turn_number ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch interactions")?;

        Ok(rows
            .into_iter()
            .map(|r| Interaction {
                id: r.id,
                conversation_id: r.conversation_id,
                turn_number: r.turn_number,
                query: r.query,
                response: r.response,
                sources: r.sources,
                processing_time_ms: r.processing_time_ms,
                created_at: r.created_at,
            })
            .collect())
    }
}

#[async_trait]
impl ConversationWriter for PgConversationStore {
    async fn start_conversation(&self) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let row: ConversationRow = sqlx::query_as(
            "INSERT INTO conversations (id, title, status, created_at, updated_at) \
             VALUES ($1, '', 'active', NOW(), NOW()) \
             RETURNING id, title, status, created_at, updated_at",
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await
        .context("failed to create conversation")?;

        debug!(conversation_id = %id, "conversation started");
        row.into_model()
    }

    async fn append_interaction(
        &self,
        conversation_id: &str,
        query: &str,
        response: &str,
        sources: &[String],
        processing_time_ms: u64,
    ) -> Result<i32> {
        let mut tx = self.pool.begin().await.context("failed to open transaction")?;

        // Row lock serializes concurrent appends on this conversation.
        let locked: Option<(String, String)> = sqlx::query_as(
            "SELECT title, status FROM conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to lock conversation")?;

        let Some((title, status)) = locked else {
            bail!("conversation {conversation_id} does not exist");
        };
        if status == ConversationStatus::Deleted.as_str() {
            bail!("conversation {conversation_id} is deleted");
        }

        let turn_number: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(turn_number), 0) + 1 FROM interactions WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await
        .context("failed to compute next turn number")?;

        sqlx::query(
            "INSERT INTO interactions \
             (id, conversation_id, turn_number, query, response, sources, processing_time_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(conversation_id)
        .bind(turn_number)
        .bind(query)
        .bind(response)
        .bind(sources)
        .bind(processing_time_ms as i64)
        .execute(&mut *tx)
        .await
        .context("failed to insert interaction")?;

        if title.is_empty() {
            sqlx::query("UPDATE conversations SET title = $2, updated_at = NOW() WHERE id = $1")
                .bind(conversation_id)
                .bind(derive_title(query))
                .execute(&mut *tx)
                .await
                .context("failed to set conversation title")?;
        } else {
            sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await
                .context("failed to touch conversation")?;
        }

        tx.commit().await.context("failed to commit interaction")?;

        debug!(conversation_id, turn_number, "interaction appended");
        Ok(turn_number)
    }

    async fn rename(&self, id: &str, title: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET title = $2, updated_at = NOW() \
             WHERE id = $1 AND status != 'deleted'",
        )
        .bind(id)
        .bind(title)
        .execute(&self.pool)
        .await
        .context("failed to rename conversation")?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .context("failed to update conversation status")?;
        Ok(result.rows_affected() > 0)
    }
}
