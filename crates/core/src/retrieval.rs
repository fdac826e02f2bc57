use crate::error::QueryError;
use crate::index::VectorIndex;
use crate::models::RetrievalResult;
use crate::traits::{with_timeout, Embedder};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Embeds a query with the index's embedder and returns the `top_k` best chunks.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, top_k: usize, timeout: Duration) -> Self {
        Self {
            embedder,
            top_k: top_k.max(1),
            timeout,
        }
    }

    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
    ) -> Result<RetrievalResult, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if index.is_empty() {
            return Err(QueryError::EmptyIndex);
        }
        if self.embedder.model_id() != index.embedding_model() {
            return Err(self.mismatch(index));
        }

        let query_vector =
            with_timeout("query embedding", self.timeout, self.embedder.embed(query))
                .await
                .map_err(QueryError::EmbeddingService)?;

        if query_vector.len() != index.dimensions() {
            return Err(QueryError::EmbeddingMismatch {
                index_model: format!(
                    "{} ({} dims)",
                    index.embedding_model(),
                    index.dimensions()
                ),
                query_model: format!(
                    "{} ({} dims)",
                    self.embedder.model_id(),
                    query_vector.len()
                ),
            });
        }

        let hits = index.search(&query_vector, self.top_k);
        debug!(
            hits = hits.len(),
            top_score = hits.first().map(|hit| hit.score),
            "retrieved chunks"
        );

        Ok(RetrievalResult {
            query: query.to_string(),
            hits,
        })
    }

    fn mismatch(&self, index: &VectorIndex) -> QueryError {
        QueryError::EmbeddingMismatch {
            index_model: index.embedding_model().to_string(),
            query_model: self.embedder.model_id().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{build_chunks, ChunkingConfig};
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::index::{IndexBuilder, SimilarityMetric};

    async fn index_of(texts: &[&str]) -> VectorIndex {
        let config = ChunkingConfig::new(200, 0).expect("valid chunking");
        let mut chunks = Vec::new();
        let mut cursor = 0;
        for (position, text) in texts.iter().enumerate() {
            let (built, next) = build_chunks(&format!("doc-{position}"), text, config, cursor);
            cursor = next;
            chunks.extend(built);
        }
        IndexBuilder::new(SimilarityMetric::Cosine, Duration::from_secs(5))
            .build(chunks, &CharacterNgramEmbedder::default())
            .await
            .expect("index builds")
    }

    fn retriever(top_k: usize) -> Retriever {
        Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            top_k,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn best_match_comes_first() {
        let index = index_of(&[
            "The turbine maintenance schedule is every six months.",
            "Quarterly revenue rose by twelve percent.",
            "Staff parking is behind the north building.",
        ])
        .await;

        let result = retriever(2)
            .retrieve(&index, "how often is turbine maintenance")
            .await
            .expect("retrieval succeeds");

        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].chunk.document_id, "doc-0");
        assert!(result.hits[0].score >= result.hits[1].score);
    }

    #[tokio::test]
    async fn repeated_queries_return_the_same_ordering() {
        let index = index_of(&["alpha beta", "beta gamma", "gamma delta", "delta alpha"]).await;
        let retriever = retriever(4);

        let first = retriever.retrieve(&index, "beta").await.expect("first");
        let second = retriever.retrieve(&index, "beta").await.expect("second");

        let ids = |result: &RetrievalResult| {
            result
                .hits
                .iter()
                .map(|hit| hit.chunk.chunk_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let index = index_of(&["some text"]).await;
        let result = retriever(4).retrieve(&index, "   ").await;
        assert!(matches!(result, Err(QueryError::EmptyQuery)));
    }

    #[tokio::test]
    async fn empty_index_is_rejected() {
        let index = index_of(&[""]).await;
        assert!(index.is_empty());

        let result = retriever(4).retrieve(&index, "anything").await;
        assert!(matches!(result, Err(QueryError::EmptyIndex)));
    }

    #[tokio::test]
    async fn other_embedding_space_is_rejected() {
        let index = index_of(&["some text"]).await;
        let retriever = Retriever::new(
            Arc::new(CharacterNgramEmbedder { dimensions: 64 }),
            4,
            Duration::from_secs(5),
        );

        let result = retriever.retrieve(&index, "some").await;
        assert!(matches!(result, Err(QueryError::EmbeddingMismatch { .. })));
    }
}
