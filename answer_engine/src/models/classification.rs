//! Query classification models
//!
//! Types describing what kind of question the user asked and which
//! retrieval path(s) ended up answering it.

use serde::{Deserialize, Serialize};

// ============================================================================
// QUERY INTENT - What kind of retrieval does the question need?
// ============================================================================

/// Classification of query intent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Answerable from the statistics store alone: "Who scored the most points?"
    SqlOnly,

    /// Needs the text corpus: "Why do fans debate home court advantage?"
    Contextual,

    /// A statistical sub-question conjoined with an explanation request
    Hybrid,

    /// Nothing matched, or the query is too short to judge
    Unknown,
}

impl Default for QueryIntent {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Per-family pattern match counts produced by the classifier
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternMatches {
    pub statistical: usize,
    pub contextual: usize,
    pub hybrid: usize,
}

/// Result of classifying one query. Created per request, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryClassification {
    pub intent: QueryIntent,

    /// Confidence in the classification (0.0 - 1.0)
    pub confidence: f32,

    /// How many patterns matched in each family
    pub matches: PatternMatches,

    /// Human-readable explanation of the decision
    pub reason: String,
}

impl QueryClassification {
    /// Whether the statistics store is expected to answer this with high
    /// confidence. Drives the empty-result fallback edge.
    pub fn is_confident_statistical(&self) -> bool {
        self.matches.statistical >= 1 && self.confidence >= 0.7
    }
}

// ============================================================================
// ROUTING LABEL - Which path(s) actually produced the answer?
// ============================================================================

/// The effective routing recorded on every response. May differ from the
/// classified intent when a path degrades (e.g. SQL failure falling back to
/// vector retrieval).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoutingLabel {
    SqlOnly,
    VectorOnly,
    Hybrid,
    Unknown,
}

impl std::fmt::Display for RoutingLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlOnly => write!(f, "sql_only"),
            Self::VectorOnly => write!(f, "vector_only"),
            Self::Hybrid => write!(f, "hybrid"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
