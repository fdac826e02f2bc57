//! In-memory vector index and the slot that publishes it.
//!
//! A [`VectorIndex`] is built completely by [`IndexBuilder`] before anyone can
//! see it and is never mutated afterwards. [`IndexSlot`] swaps the published
//! `Arc` in one step, so readers hold either the old index or the new one.

use crate::error::{IngestError, QueryError, ServiceError};
use crate::models::{Chunk, EmbeddedChunk, ScoredChunk};
use crate::traits::{with_timeout, Embedder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    L2,
}

impl SimilarityMetric {
    /// Relevance of `candidate` to `query`; higher is always more relevant.
    pub fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(query, candidate),
            Self::L2 => 1.0 / (1.0 + euclidean_distance(query, candidate)),
        }
    }
}

/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    entries: Vec<EmbeddedChunk>,
    dimensions: usize,
    metric: SimilarityMetric,
    embedding_model: String,
    built_at: DateTime<Utc>,
}

impl VectorIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Indexed chunks in sequence order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|entry| &entry.chunk)
    }

    /// Exact scan. Ties keep sequence order.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(&EmbeddedChunk, f32)> = self
            .entries
            .iter()
            .map(|entry| (entry, self.metric.score(query_vector, &entry.vector)))
            .collect();

        scored.sort_by(|(left, left_score), (right, right_score)| {
            right_score
                .total_cmp(left_score)
                .then(left.chunk.sequence_index.cmp(&right.chunk.sequence_index))
        });

        scored
            .into_iter()
            .take(top_k)
            .map(|(entry, score)| ScoredChunk {
                chunk: entry.chunk.clone(),
                score,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexBuilder {
    pub metric: SimilarityMetric,
    pub timeout: Duration,
}

impl IndexBuilder {
    pub fn new(metric: SimilarityMetric, timeout: Duration) -> Self {
        Self { metric, timeout }
    }

    /// Embeds every chunk and returns a finished index. Chunks whose text was
    /// already seen are skipped. Any embedding failure discards the whole build.
    pub async fn build(
        &self,
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
    ) -> Result<VectorIndex, IngestError> {
        let chunks = dedup_by_content(chunks);
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(embedder.max_batch_size().max(1)) {
            let embedded = with_timeout("embedding", self.timeout, embedder.embed_batch(group))
                .await
                .map_err(IngestError::EmbeddingService)?;
            vectors.extend(embedded);
        }

        if vectors.len() != chunks.len() {
            return Err(invalid_embeddings(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or(embedder.dimensions());
        if dimensions == 0 {
            return Err(invalid_embeddings(
                "embedding service returned empty vectors".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            if vector.len() != dimensions {
                return Err(invalid_embeddings(format!(
                    "embedding dimension {} != {} for chunk {}",
                    vector.len(),
                    dimensions,
                    chunk.sequence_index
                )));
            }
            entries.push(EmbeddedChunk { chunk, vector });
        }

        info!(
            chunks = entries.len(),
            dimensions,
            model = embedder.model_id(),
            "vector index built"
        );

        Ok(VectorIndex {
            entries,
            dimensions,
            metric: self.metric,
            embedding_model: embedder.model_id().to_string(),
            built_at: Utc::now(),
        })
    }
}

fn invalid_embeddings(details: String) -> IngestError {
    IngestError::EmbeddingService(ServiceError::BackendResponse {
        backend: "embedder".to_string(),
        details,
    })
}

fn dedup_by_content(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    let before = chunks.len();
    let unique: Vec<Chunk> = chunks
        .into_iter()
        .filter(|chunk| {
            let digest = Sha256::digest(chunk.text.as_bytes());
            seen.insert(format!("{digest:x}"))
        })
        .collect();

    if unique.len() != before {
        debug!(dropped = before - unique.len(), "skipped duplicate chunks");
    }
    unique
}

/// Holds the published index for one session.
#[derive(Debug, Default)]
pub struct IndexSlot {
    current: RwLock<Option<Arc<VectorIndex>>>,
}

impl IndexSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the published index and returns the one it displaced.
    pub async fn publish(&self, index: VectorIndex) -> Option<Arc<VectorIndex>> {
        let mut current = self.current.write().await;
        current.replace(Arc::new(index))
    }

    pub async fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.current.read().await.clone()
    }

    /// The published index, or `EmptyIndex` when there is nothing to query.
    pub async fn require(&self) -> Result<Arc<VectorIndex>, QueryError> {
        match self.snapshot().await {
            Some(index) if !index.is_empty() => Ok(index),
            _ => Err(QueryError::EmptyIndex),
        }
    }

    pub async fn clear(&self) -> Option<Arc<VectorIndex>> {
        self.current.write().await.take()
    }
}
