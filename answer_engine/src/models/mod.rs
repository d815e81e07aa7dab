//! Data models for the answer engine

pub mod chat;
pub mod classification;
pub mod conversation;
pub mod retrieval;
pub mod sql;

pub use chat::{ChatRequest, ChatResponse, SourceAttribution, MAX_QUERY_CHARS, MAX_TOP_K, UNAVAILABLE_ANSWER};
pub use classification::{PatternMatches, QueryClassification, QueryIntent, RoutingLabel};
pub use conversation::{Conversation, ConversationStatus, ConversationSummary, HistoryTurn, Interaction};
pub use retrieval::{ChunkDataType, ChunkSource, DocumentChunk, RetrievalHit};
pub use sql::{SqlExecution, SqlFailure, SqlOutcome, SqlRow};

use std::sync::Arc;

use courtside_config::Settings;

use crate::services::conversation_store::{ConversationReader, ConversationWriter};
use crate::services::orchestrator::Orchestrator;
use crate::services::vector_index::VectorIndex;

/// Shared application state, constructed once in the composition root.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<Orchestrator>,
    pub conversation_reader: Arc<dyn ConversationReader>,
    pub conversation_writer: Arc<dyn ConversationWriter>,
    pub index: Arc<VectorIndex>,
}
