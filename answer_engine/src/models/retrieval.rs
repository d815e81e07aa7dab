//! Retrieval models
//!
//! The unit of retrievable text (chunk), its provenance, and the scored hit
//! the vector index hands to the prompt assembler.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Recognized values of the `data_type` metadata tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkDataType {
    PlayerStats,
    TeamStats,
    GameData,
    Discussion,
    Glossary,
}

impl ChunkDataType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "player_stats" => Some(Self::PlayerStats),
            "team_stats" => Some(Self::TeamStats),
            "game_data" => Some(Self::GameData),
            "discussion" => Some(Self::Discussion),
            "glossary" => Some(Self::Glossary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerStats => "player_stats",
            Self::TeamStats => "team_stats",
            Self::GameData => "game_data",
            Self::Discussion => "discussion",
            Self::Glossary => "glossary",
        }
    }
}

/// Where a chunk came from: a file, optionally narrowed to a sheet or page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkSource {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl std::fmt::Display for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(sheet) = &self.sheet {
            write!(f, " ({})", sheet)?;
        }
        if let Some(page) = self.page {
            write!(f, " p.{}", page)?;
        }
        Ok(())
    }
}

/// An immutable unit of retrievable text with a precomputed embedding row in
/// the index matrix. Chunks are referenced by their integer position, which
/// is stable for the lifetime of a loaded index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Stable identifier assigned at ingestion time
    pub id: String,

    /// The text payload
    pub text: String,

    /// Provenance descriptor
    pub source: ChunkSource,

    /// Free-form metadata; carries at minimum a `data_type` tag
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DocumentChunk {
    /// The recognized `data_type` tag, if one is present and valid.
    pub fn data_type(&self) -> Option<ChunkDataType> {
        self.metadata
            .get("data_type")
            .and_then(|raw| ChunkDataType::parse(raw))
    }
}

/// A chunk returned by the vector index together with its similarity score,
/// scaled to [0, 100] (percent of cosine similarity shifted into
/// non-negative range).
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    /// Position of the chunk within the loaded index
    pub position: usize,

    /// Similarity in [0, 100], one decimal place
    pub score: f64,

    pub chunk: Arc<DocumentChunk>,
}
