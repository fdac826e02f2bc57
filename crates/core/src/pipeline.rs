//! One upload session: build an index from documents, then answer queries
//! against it.

use crate::chunking::{chunk_documents, stitch_chunks};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, IngestError, QueryError};
use crate::evaluation::SummaryEvaluator;
use crate::extractor::{extract_documents, LopdfExtractor, PdfExtractor, SkippedDocument};
use crate::generation::AnswerGenerator;
use crate::index::{IndexBuilder, IndexSlot, VectorIndex};
use crate::models::{Query, QueryResponse, QueryRoute, RawDocument};
use crate::retrieval::Retriever;
use crate::router::PromptRouter;
use crate::traits::{ChatModel, Embedder};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub documents: usize,
    pub chunks: usize,
    /// Chunks left after duplicate text was dropped.
    pub indexed: usize,
    pub skipped: Vec<SkippedDocument>,
}

pub struct DocQaSession {
    config: PipelineConfig,
    extractor: Box<dyn PdfExtractor + Send + Sync>,
    embedder: Arc<dyn Embedder>,
    builder: IndexBuilder,
    retriever: Retriever,
    router: PromptRouter,
    generator: AnswerGenerator,
    evaluator: SummaryEvaluator,
    slot: IndexSlot,
    build_lock: Mutex<()>,
}

impl DocQaSession {
    /// `embedder` builds and queries the index; `encoder` is only used to
    /// score summaries.
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<dyn Embedder>,
        chat_model: Arc<dyn ChatModel>,
        encoder: Arc<dyn Embedder>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            extractor: Box::new(LopdfExtractor),
            builder: IndexBuilder::new(config.similarity_metric, config.embedding_timeout()),
            retriever: Retriever::new(embedder.clone(), config.top_k, config.embedding_timeout()),
            router: PromptRouter::new(&config.summary_triggers),
            generator: AnswerGenerator::new(chat_model, config.generation_timeout()),
            evaluator: SummaryEvaluator::new(
                encoder,
                config.encoder_timeout(),
                config.encoder_max_chars,
            ),
            embedder,
            slot: IndexSlot::new(),
            build_lock: Mutex::new(()),
            config,
        })
    }

    pub fn with_extractor(mut self, extractor: impl PdfExtractor + Send + Sync + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replaces the published index with one built from `documents`.
    ///
    /// Unreadable documents are skipped and listed in the report. If embedding
    /// fails the previously published index stays in place.
    pub async fn ingest(
        &self,
        documents: Vec<RawDocument>,
    ) -> Result<IngestionReport, IngestError> {
        let _build = self.build_lock.lock().await;

        let extraction = extract_documents(self.extractor.as_ref(), documents);
        let chunks = chunk_documents(&extraction.documents, self.config.chunking());
        let chunk_count = chunks.len();

        let index = self.builder.build(chunks, self.embedder.as_ref()).await?;
        let indexed = index.len();

        if index.is_empty() {
            warn!("no text was extracted; queries will fail until documents are uploaded");
        }
        let displaced = self.slot.publish(index).await;

        info!(
            documents = extraction.documents.len(),
            skipped = extraction.skipped.len(),
            chunks = chunk_count,
            indexed,
            replaced = displaced.is_some(),
            "index published"
        );

        Ok(IngestionReport {
            documents: extraction.documents.len(),
            chunks: chunk_count,
            indexed,
            skipped: extraction.skipped,
        })
    }

    /// The index queries currently run against.
    pub async fn index(&self) -> Option<Arc<VectorIndex>> {
        self.slot.snapshot().await
    }

    pub async fn clear(&self) {
        let _build = self.build_lock.lock().await;
        self.slot.clear().await;
    }

    pub async fn ask(&self, query: &Query) -> Result<QueryResponse, QueryError> {
        let started = Instant::now();
        if query.text.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let index = self.slot.require().await?;
        let budget = self.config.context_budget(query.model);

        match self.router.classify(&query.text) {
            QueryRoute::Answer => {
                let retrieval = self.retriever.retrieve(&index, &query.text).await?;
                let context = self.router.answer_prompt(&query.text, retrieval.hits, budget);
                let text = self.generator.generate(&context.prompt, query.model).await?;

                Ok(QueryResponse::Answer {
                    text,
                    sources: context.sources,
                    elapsed: started.elapsed(),
                })
            }
            QueryRoute::Summarize => {
                let context = self.router.summary_prompt(&query.text, index.chunks(), budget);
                let text = self.generator.generate(&context.prompt, query.model).await?;

                let reference = stitch_chunks(&context.chunks, self.config.chunk_overlap);
                let evaluation = self.evaluator.evaluate(&text, &reference).await;

                Ok(QueryResponse::Summary {
                    text,
                    evaluation,
                    truncation: context.truncation,
                    elapsed: started.elapsed(),
                })
            }
        }
    }
}
