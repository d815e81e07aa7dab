//! Chunk quality filter
//!
//! Deterministic predicate that removes noisy chunks before they become
//! retrieval hits: column-header fragments, typographic noise, and OCR
//! garbage historically degraded answer relevancy. The scoring is
//! conservative so well-formed discussion text is never filtered.

use crate::models::{ChunkDataType, DocumentChunk};

/// Minimum text length before coherence scoring applies at all.
const MIN_COHERENT_CHARS: usize = 20;

/// Quality score components, each bounded:
/// coherence ≤ 0.6, metadata completeness ≤ 0.3, authority bonus ≤ 0.1.
#[derive(Debug, Clone, Copy)]
pub struct QualityFilter {
    threshold: f64,
}

impl QualityFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score a chunk in [0, 1].
    pub fn score(chunk: &DocumentChunk) -> f64 {
        let mut score = coherence(&chunk.text);

        // Metadata completeness
        if !chunk.source.file.trim().is_empty() {
            score += 0.15;
        }
        let data_type = chunk.data_type();
        if data_type.is_some() {
            score += 0.15;
        }

        // Source authority bonus
        if matches!(
            data_type,
            Some(ChunkDataType::Glossary) | Some(ChunkDataType::PlayerStats)
        ) {
            score += 0.1;
        }

        score
    }

    pub fn passes(&self, chunk: &DocumentChunk) -> bool {
        Self::score(chunk) >= self.threshold
    }
}

/// Coherence by mean word length: prose lands around 4-8 characters per
/// token, while header fragments and OCR noise skew far shorter or longer.
fn coherence(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_COHERENT_CHARS {
        return 0.0;
    }

    let mut words = 0usize;
    let mut chars = 0usize;
    for word in trimmed.split_whitespace() {
        words += 1;
        chars += word.chars().count();
    }
    if words == 0 {
        return 0.0;
    }

    let mean = chars as f64 / words as f64;
    if (4.0..=8.0).contains(&mean) {
        0.6
    } else if (3.0..4.0).contains(&mean) || (8.0 < mean && mean <= 12.0) {
        0.4
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkSource;
    use std::collections::HashMap;

    fn chunk(text: &str, file: &str, data_type: Option<&str>) -> DocumentChunk {
        let mut metadata = HashMap::new();
        if let Some(dt) = data_type {
            metadata.insert("data_type".to_string(), dt.to_string());
        }
        DocumentChunk {
            id: "c1".to_string(),
            text: text.to_string(),
            source: ChunkSource {
                file: file.to_string(),
                sheet: None,
                page: None,
            },
            metadata,
        }
    }

    #[test]
    fn well_formed_discussion_text_passes() {
        let c = chunk(
            "Home court advantage matters most in close playoff series because crowds affect free throws.",
            "forum_threads.csv",
            Some("discussion"),
        );
        let score = QualityFilter::score(&c);
        assert!(score >= 0.5, "score was {score}");
        assert!(QualityFilter::new(0.5).passes(&c));
    }

    #[test]
    fn glossary_chunk_gets_authority_bonus() {
        let base = chunk(
            "True shooting percentage measures scoring efficiency across all shot types.",
            "glossary.md",
            Some("discussion"),
        );
        let boosted = chunk(
            "True shooting percentage measures scoring efficiency across all shot types.",
            "glossary.md",
            Some("glossary"),
        );
        assert!(QualityFilter::score(&boosted) > QualityFilter::score(&base));
    }

    #[test]
    fn short_fragment_is_filtered() {
        let c = chunk("PTS REB AST", "stats.xlsx", Some("player_stats"));
        // Under 20 characters: coherence 0, metadata alone cannot reach 0.5.
        assert!(!QualityFilter::new(0.5).passes(&c));
    }

    #[test]
    fn ocr_noise_with_long_tokens_is_filtered() {
        let c = chunk(
            "aaaaaaaaaaaaaaaaaaaaaaaa bbbbbbbbbbbbbbbbbbbbbbb ccccccccccccccccccc",
            "scan.pdf",
            None,
        );
        assert!(!QualityFilter::new(0.5).passes(&c));
    }

    #[test]
    fn missing_metadata_lowers_score_below_threshold_band() {
        let with = chunk(
            "Denver built its offense around elbow touches for the big man.",
            "articles.csv",
            Some("discussion"),
        );
        let without = chunk(
            "Denver built its offense around elbow touches for the big man.",
            "",
            None,
        );
        assert!(QualityFilter::score(&with) > QualityFilter::score(&without));
        assert!(QualityFilter::new(0.5).passes(&with));
    }

    #[test]
    fn borderline_mean_word_length_scores_partial_coherence() {
        // Mean word length just above 8 lands in the 0.4 band.
        let c = chunk(
            "basketball strategies developed throughout postseason matchups",
            "essays.md",
            Some("discussion"),
        );
        let score = QualityFilter::score(&c);
        assert!((0.69..0.71).contains(&score), "score was {score}");
    }
}
