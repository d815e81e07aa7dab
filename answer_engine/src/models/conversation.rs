//! Conversation models
//!
//! Persistent conversations and their turns. A conversation's interactions
//! form a contiguous sequence numbered from 1; interactions are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
    Deleted,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A multi-turn conversation. Created lazily on the first turn when no
/// identifier was supplied; titled after the first user query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing view of a conversation with its message count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

/// One user/assistant exchange within a conversation. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub conversation_id: String,
    pub turn_number: i32,
    pub query: String,
    pub response: String,
    pub sources: Vec<String>,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// The slice of an interaction the prompt assembler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub turn_number: i32,
    pub query: String,
    pub response: String,
}
