//! Chat request/response models
//!
//! The inbound request schema is a typed record with explicit bounds and
//! hand-written validation; nothing is inferred by introspection.

use serde::{Deserialize, Serialize};

use crate::errors::ApiError;
use crate::models::classification::RoutingLabel;

/// Maximum accepted query length, in characters.
pub const MAX_QUERY_CHARS: usize = 2_000;

/// Maximum caller-requested top-k. Zero means "let the system choose".
pub const MAX_TOP_K: usize = 50;

/// Answer returned when no grounded material survived retrieval. A
/// successful response, not an error.
pub const UNAVAILABLE_ANSWER: &str = "The available context doesn't contain this information.";

fn default_true() -> bool {
    true
}

/// Inbound chat request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// The user's question, 1..=2000 characters
    pub query: String,

    /// Requested top-k for retrieval; 0 selects adaptive k
    #[serde(default)]
    pub k: usize,

    /// Continue an existing conversation
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// Client-side turn counter; informational only
    #[serde(default)]
    pub turn_number: Option<u32>,

    #[serde(default = "default_true")]
    pub include_sources: bool,
}

impl ChatRequest {
    /// Validate bounds. Runs before any external call.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.query.trim().is_empty() {
            return Err(ApiError::InvalidInput("query must not be empty".to_string()));
        }
        let chars = self.query.chars().count();
        if chars > MAX_QUERY_CHARS {
            return Err(ApiError::InvalidInput(format!(
                "query is {} characters; the limit is {}",
                chars, MAX_QUERY_CHARS
            )));
        }
        if self.k > MAX_TOP_K {
            return Err(ApiError::InvalidInput(format!(
                "k is {}; the limit is {}",
                self.k, MAX_TOP_K
            )));
        }
        if let Some(id) = &self.conversation_id {
            if id.trim().is_empty() {
                return Err(ApiError::InvalidInput(
                    "conversation_id must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One cited source on a response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAttribution {
    pub source: String,
    /// Similarity in [0, 100]
    pub score: f64,
}

/// Outbound chat response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,

    /// Cited sources, ordered by descending score
    pub sources: Vec<SourceAttribution>,

    pub processing_time_ms: u64,

    /// Which retrieval path(s) actually produced the answer
    pub routing: RoutingLabel,

    pub conversation_id: String,
    pub turn_number: i32,

    /// Set when the answer was produced but could not be persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_warning: Option<String>,
}
