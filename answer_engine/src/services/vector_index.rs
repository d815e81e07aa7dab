//! Vector Index
//!
//! In-memory nearest-neighbor search over normalized embedding vectors. The
//! index is the pair (N×D unit-norm matrix, parallel chunk list), loaded
//! atomically at startup and read-only during serving: searches run without
//! locks.
//!
//! On disk the matrix is a small binary format (magic, version tag, N, D,
//! little-endian f32 rows) and the chunk list is JSON carrying the same
//! version tag; a tag mismatch means the two files came from different
//! ingestion runs and the load fails.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::models::{ChunkDataType, DocumentChunk, RetrievalHit};
use crate::services::quality::QualityFilter;

/// Matrix file magic: "CSIX" (Courtside index).
const MATRIX_MAGIC: [u8; 4] = *b"CSIX";

/// Unit-norm tolerance for loaded and queried vectors.
const NORM_TOLERANCE: f32 = 1e-5;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query vector: {0}")]
    InvalidInput(String),
}

/// On-disk chunk list.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkManifest {
    version: u32,
    chunks: Vec<DocumentChunk>,
}

/// The loaded index. Immutable after construction; chunk positions are
/// stable for its lifetime.
#[derive(Debug)]
pub struct VectorIndex {
    /// Row-major N×D matrix, flattened
    vectors: Vec<f32>,
    dim: usize,
    chunks: Vec<Arc<DocumentChunk>>,
    quality: QualityFilter,
    oversample: usize,
}

impl VectorIndex {
    /// Load the matrix and chunk list from disk and validate them against
    /// each other. Both files load before anything is served, so a request
    /// never observes a half-loaded index.
    pub fn load(
        matrix_path: impl AsRef<Path>,
        chunks_path: impl AsRef<Path>,
        expected_dim: usize,
        quality_threshold: f64,
        oversample: usize,
    ) -> Result<Self> {
        let matrix_path = matrix_path.as_ref();
        let chunks_path = chunks_path.as_ref();

        let raw = std::fs::read(matrix_path)
            .with_context(|| format!("failed to read matrix file {}", matrix_path.display()))?;
        let (matrix_version, n, dim, vectors) = parse_matrix(&raw)?;

        let manifest_raw = std::fs::read_to_string(chunks_path)
            .with_context(|| format!("failed to read chunk list {}", chunks_path.display()))?;
        let manifest: ChunkManifest =
            serde_json::from_str(&manifest_raw).context("failed to parse chunk list")?;

        if manifest.version != matrix_version {
            bail!(
                "index version mismatch: matrix is v{}, chunk list is v{}",
                matrix_version,
                manifest.version
            );
        }
        if manifest.chunks.len() != n {
            bail!(
                "index shape mismatch: matrix has {} rows, chunk list has {} chunks",
                n,
                manifest.chunks.len()
            );
        }
        if dim != expected_dim {
            bail!(
                "index dimension {} does not match configured embedding dimension {}",
                dim,
                expected_dim
            );
        }

        let index = Self::from_parts(
            vectors,
            dim,
            manifest.chunks,
            quality_threshold,
            oversample,
        )?;

        info!(
            chunks = index.len(),
            dim,
            version = matrix_version,
            "vector index loaded"
        );

        Ok(index)
    }

    /// Build an index from already-materialized rows. Validates shape and
    /// unit norms.
    pub fn from_parts(
        vectors: Vec<f32>,
        dim: usize,
        chunks: Vec<DocumentChunk>,
        quality_threshold: f64,
        oversample: usize,
    ) -> Result<Self> {
        if dim == 0 {
            bail!("embedding dimension must be positive");
        }
        if vectors.len() != chunks.len() * dim {
            bail!(
                "matrix has {} values; expected {} chunks x {} dims",
                vectors.len(),
                chunks.len(),
                dim
            );
        }
        for (position, row) in vectors.chunks_exact(dim).enumerate() {
            let norm = l2_norm(row);
            if (norm - 1.0).abs() > NORM_TOLERANCE {
                bail!("vector at position {position} has norm {norm}; expected unit norm");
            }
        }

        Ok(Self {
            vectors,
            dim,
            chunks: chunks.into_iter().map(Arc::new).collect(),
            quality: QualityFilter::new(quality_threshold),
            oversample: oversample.max(1),
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Return the top-k most similar chunks above the quality threshold.
    ///
    /// Candidates are the `k * oversample` highest inner products (equal to
    /// cosine similarity since every vector is unit-norm), ordered by
    /// descending similarity with ties broken by ascending position; the
    /// first k that pass the quality filter are returned. Empty results are
    /// not an error.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<ChunkDataType>,
    ) -> Result<Vec<RetrievalHit>, SearchError> {
        if query.len() != self.dim {
            return Err(SearchError::InvalidInput(format!(
                "query has {} dims; index has {}",
                query.len(),
                self.dim
            )));
        }
        let norm = l2_norm(query);
        if (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(SearchError::InvalidInput(format!(
                "query vector norm is {norm}; expected unit norm"
            )));
        }
        if k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        // Score every row; the metadata filter narrows candidates before
        // selection so oversampling is spent on eligible chunks.
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dim)
            .enumerate()
            .filter(|(position, _)| match filter {
                Some(data_type) => self.chunks[*position].data_type() == Some(data_type),
                None => true,
            })
            .map(|(position, row)| (position, dot(query, row)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let candidate_count = (k.saturating_mul(self.oversample)).min(scored.len());

        let mut hits = Vec::with_capacity(k);
        for &(position, similarity) in scored[..candidate_count].iter() {
            let chunk = &self.chunks[position];
            if !self.quality.passes(chunk) {
                continue;
            }
            hits.push(RetrievalHit {
                position,
                score: scale_similarity(similarity),
                chunk: Arc::clone(chunk),
            });
            if hits.len() == k {
                break;
            }
        }

        Ok(hits)
    }
}

fn parse_matrix(raw: &[u8]) -> Result<(u32, usize, usize, Vec<f32>)> {
    if raw.len() < 16 {
        bail!("matrix file too short for header");
    }
    if raw[0..4] != MATRIX_MAGIC {
        bail!("matrix file has wrong magic");
    }
    let version = u32::from_le_bytes(raw[4..8].try_into().map_err(|_| anyhow!("bad header"))?);
    let n = u32::from_le_bytes(raw[8..12].try_into().map_err(|_| anyhow!("bad header"))?) as usize;
    let dim = u32::from_le_bytes(raw[12..16].try_into().map_err(|_| anyhow!("bad header"))?) as usize;

    let body = &raw[16..];
    let expected = n
        .checked_mul(dim)
        .and_then(|v| v.checked_mul(4))
        .ok_or_else(|| anyhow!("matrix header overflows"))?;
    if body.len() != expected {
        bail!(
            "matrix body is {} bytes; header promises {} ({}x{})",
            body.len(),
            expected,
            n,
            dim
        );
    }

    let vectors = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok((version, n, dim, vectors))
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Report similarity as `round((s + 1) / 2 * 100, 1)`: cosine shifted into
/// non-negative range and expressed as a percentage.
fn scale_similarity(similarity: f32) -> f64 {
    let percent = (f64::from(similarity) + 1.0) / 2.0 * 100.0;
    (percent * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkSource;
    use std::collections::HashMap;
    use std::io::Write;

    fn chunk(id: &str, text: &str, data_type: &str) -> DocumentChunk {
        let mut metadata = HashMap::new();
        metadata.insert("data_type".to_string(), data_type.to_string());
        DocumentChunk {
            id: id.to_string(),
            text: text.to_string(),
            source: ChunkSource {
                file: format!("{id}.csv"),
                sheet: None,
                page: None,
            },
            metadata,
        }
    }

    /// 2-dimensional toy index with quality-passing prose chunks.
    fn toy_index() -> VectorIndex {
        let chunks = vec![
            chunk("east", "Boston leaned on switching defense through the playoff rounds.", "discussion"),
            chunk("west", "Denver built the offense around elbow touches and cutting guards.", "discussion"),
            chunk("north", "Toronto crowds stayed loud deep into losing seasons either way.", "discussion"),
        ];
        let vectors = vec![
            1.0, 0.0, // east
            0.0, 1.0, // west
            -1.0, 0.0, // north
        ];
        VectorIndex::from_parts(vectors, 2, chunks, 0.5, 3).unwrap()
    }

    #[test]
    fn search_orders_by_similarity_then_position() {
        let index = toy_index();
        let hits = index.search(&[1.0, 0.0], 3, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
        assert_eq!(hits[2].position, 2);
        assert_eq!(hits[0].score, 100.0);
        assert_eq!(hits[1].score, 50.0);
        assert_eq!(hits[2].score, 0.0);
    }

    #[test]
    fn search_is_deterministic() {
        let index = toy_index();
        let first = index.search(&[0.0, 1.0], 2, None).unwrap();
        let second = index.search(&[0.0, 1.0], 2, None).unwrap();
        let positions: Vec<usize> = first.iter().map(|h| h.position).collect();
        assert_eq!(positions, second.iter().map(|h| h.position).collect::<Vec<_>>());
    }

    #[test]
    fn non_unit_query_is_rejected() {
        let index = toy_index();
        let err = index.search(&[3.0, 4.0], 2, None).unwrap_err();
        assert!(matches!(err, SearchError::InvalidInput(_)));
    }

    #[test]
    fn wrong_dimension_query_is_rejected() {
        let index = toy_index();
        assert!(index.search(&[1.0, 0.0, 0.0], 2, None).is_err());
    }

    #[test]
    fn low_quality_chunks_are_skipped() {
        let chunks = vec![
            chunk("noise", "PTS REB", "player_stats"),
            chunk("prose", "Boston leaned on switching defense through the playoff rounds.", "discussion"),
        ];
        let vectors = vec![1.0, 0.0, 0.0, 1.0];
        let index = VectorIndex::from_parts(vectors, 2, chunks, 0.5, 3).unwrap();

        // The noise chunk is the nearest neighbor but fails the filter.
        let hits = index.search(&[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "prose");
    }

    #[test]
    fn data_type_filter_narrows_candidates() {
        let index = toy_index();
        let hits = index
            .search(&[1.0, 0.0], 3, Some(ChunkDataType::Glossary))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn non_unit_row_fails_construction() {
        let chunks = vec![chunk("a", "Boston leaned on switching defense through the rounds.", "discussion")];
        let err = VectorIndex::from_parts(vec![0.5, 0.5], 2, chunks, 0.5, 3);
        assert!(err.is_err());
    }

    #[test]
    fn load_rejects_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let matrix_path = dir.path().join("vectors.bin");
        let chunks_path = dir.path().join("chunks.json");

        let mut matrix = Vec::new();
        matrix.extend_from_slice(&MATRIX_MAGIC);
        matrix.extend_from_slice(&2u32.to_le_bytes()); // version 2
        matrix.extend_from_slice(&1u32.to_le_bytes()); // n
        matrix.extend_from_slice(&2u32.to_le_bytes()); // dim
        matrix.extend_from_slice(&1.0f32.to_le_bytes());
        matrix.extend_from_slice(&0.0f32.to_le_bytes());
        std::fs::File::create(&matrix_path)
            .unwrap()
            .write_all(&matrix)
            .unwrap();

        let manifest = ChunkManifest {
            version: 1, // tag disagrees with the matrix
            chunks: vec![chunk("a", "Boston leaned on switching defense through the rounds.", "discussion")],
        };
        std::fs::write(&chunks_path, serde_json::to_string(&manifest).unwrap()).unwrap();

        let err = VectorIndex::load(&matrix_path, &chunks_path, 2, 0.5, 3).unwrap_err();
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn load_round_trips_a_small_index() {
        let dir = tempfile::tempdir().unwrap();
        let matrix_path = dir.path().join("vectors.bin");
        let chunks_path = dir.path().join("chunks.json");

        let mut matrix = Vec::new();
        matrix.extend_from_slice(&MATRIX_MAGIC);
        matrix.extend_from_slice(&7u32.to_le_bytes());
        matrix.extend_from_slice(&2u32.to_le_bytes());
        matrix.extend_from_slice(&2u32.to_le_bytes());
        for value in [1.0f32, 0.0, 0.0, 1.0] {
            matrix.extend_from_slice(&value.to_le_bytes());
        }
        std::fs::File::create(&matrix_path)
            .unwrap()
            .write_all(&matrix)
            .unwrap();

        let manifest = ChunkManifest {
            version: 7,
            chunks: vec![
                chunk("a", "Boston leaned on switching defense through the playoff rounds.", "discussion"),
                chunk("b", "Denver built the offense around elbow touches and cutting guards.", "discussion"),
            ],
        };
        std::fs::write(&chunks_path, serde_json::to_string(&manifest).unwrap()).unwrap();

        let index = VectorIndex::load(&matrix_path, &chunks_path, 2, 0.5, 3).unwrap();
        assert_eq!(index.len(), 2);
        let hits = index.search(&[0.0, 1.0], 1, None).unwrap();
        assert_eq!(hits[0].chunk.id, "b");
    }
}
