//! In-memory vector index over document segments.
//!
//! Vectors are stored in segment order. Search is an exact scan using cosine
//! similarity; the per-vector norms are cached next to the entries and
//! recomputed after deserialization.

use crate::embeddings::Embedder;
use crate::error::{EmbedError, IndexError};
use crate::models::{RetrievalResult, ScoredSegment, Segment};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

pub const DEFAULT_TOP_K: usize = 2;

const FORMAT_VERSION: u32 = 1;
/// Segments sent to the embedder per call.
const EMBED_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub segment: Segment,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedding_model: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
}

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    format_version: u32,
    embedding_model: &'a str,
    dimensions: usize,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct PersistedIndex {
    format_version: u32,
    embedding_model: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embeds every segment and stores the vectors in segment order.
    pub fn build<E>(segments: Vec<Segment>, embedder: &E) -> Result<Self, IndexError>
    where
        E: Embedder + ?Sized,
    {
        if segments.is_empty() {
            return Err(IndexError::NoSegments);
        }

        info!(
            segments = segments.len(),
            model = embedder.model_id(),
            "embedding segments"
        );

        let mut entries = Vec::with_capacity(segments.len());
        let mut pending = segments.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<Segment> = pending.by_ref().take(EMBED_BATCH_SIZE).collect();
            let position = batch[0].position;
            let texts: Vec<&str> = batch.iter().map(|segment| segment.text.as_str()).collect();

            let vectors = embedder
                .embed_batch(&texts)
                .map_err(|source| IndexError::Embedding { position, source })?;
            if vectors.len() != batch.len() {
                return Err(IndexError::Embedding {
                    position,
                    source: EmbedError::InvalidResponse(format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        vectors.len()
                    )),
                });
            }

            entries.extend(
                batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(segment, vector)| IndexEntry { segment, vector }),
            );
            debug!(embedded = entries.len(), "embedding progress");
        }

        Self::from_entries(embedder.model_id().to_string(), entries)
    }

    fn from_entries(embedding_model: String, entries: Vec<IndexEntry>) -> Result<Self, IndexError> {
        let dimensions = entries.first().map(|entry| entry.vector.len()).unwrap_or(0);
        if dimensions == 0 {
            return Err(IndexError::NoSegments);
        }

        for (position, entry) in entries.iter().enumerate() {
            if entry.vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    actual: entry.vector.len(),
                });
            }
            if entry.vector.iter().any(|value| !value.is_finite()) {
                return Err(IndexError::NonFinite(position));
            }
        }

        let norms = entries.iter().map(|entry| norm(&entry.vector)).collect();
        Ok(Self {
            embedding_model,
            dimensions,
            entries,
            norms,
        })
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.entries.iter().map(|entry| &entry.segment)
    }

    /// Top-`k` segments by cosine similarity; ties go to the earlier segment.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<RetrievalResult, IndexError> {
        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let query_norm = norm(query_vector);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(index, (entry, entry_norm))| {
                let denominator = query_norm * entry_norm;
                let score = if denominator > 0.0 {
                    dot(query_vector, &entry.vector) / denominator
                } else {
                    0.0
                };
                (index, score)
            })
            .collect();

        scored.sort_by(|left, right| match right.1.total_cmp(&left.1) {
            Ordering::Equal => self.entries[left.0]
                .segment
                .position
                .cmp(&self.entries[right.0].segment.position),
            other => other,
        });

        Ok(RetrievalResult {
            hits: scored
                .into_iter()
                .take(k)
                .map(|(index, score)| ScoredSegment {
                    segment: self.entries[index].segment.clone(),
                    score,
                })
                .collect(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, IndexError> {
        let persisted = PersistedIndexRef {
            format_version: FORMAT_VERSION,
            embedding_model: &self.embedding_model,
            dimensions: self.dimensions,
            entries: &self.entries,
        };
        Ok(serde_json::to_vec(&persisted)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, IndexError> {
        let persisted: PersistedIndex = serde_json::from_slice(bytes)?;
        if persisted.format_version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedFormat(persisted.format_version));
        }

        let index = Self::from_entries(persisted.embedding_model, persisted.entries)?;
        if index.dimensions != persisted.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: persisted.dimensions,
                actual: index.dimensions,
            });
        }
        Ok(index)
    }
}

impl PartialEq for VectorIndex {
    fn eq(&self, other: &Self) -> bool {
        self.embedding_model == other.embedding_model
            && self.dimensions == other.dimensions
            && self.entries == other.entries
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

fn norm(vector: &[f32]) -> f32 {
    dot(vector, vector).sqrt()
}
