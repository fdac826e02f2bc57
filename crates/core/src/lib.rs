pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod evaluation;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod router;
pub mod traits;

pub use chunking::{
    build_chunks, chunk_documents, normalize_whitespace, split_text, stitch_chunks, ChunkingConfig,
};
pub use config::{ModelLimit, PipelineConfig, PipelineConfigBuilder};
pub use embeddings::{
    CharacterNgramEmbedder, GeminiEmbedder, GeminiTaskType, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ConfigError, ExtractionError, IngestError, QueryError, ServiceError};
pub use evaluation::{lexical_overlap, LexicalOverlap, SummaryEvaluator};
pub use extractor::{
    extract_documents, ExtractedDocument, ExtractionReport, LopdfExtractor, PageText,
    PdfExtractor, SkippedDocument,
};
pub use generation::{
    AnswerGenerator, ExtractiveChatModel, GenerationParams, GroqChatModel, RetryingChatModel,
};
pub use index::{IndexBuilder, IndexSlot, SimilarityMetric, VectorIndex};
pub use models::{
    Chunk, EmbeddedChunk, EvaluationResult, ModelId, Query, QueryResponse, QueryRoute,
    RawDocument, RetrievalResult, ScoredChunk, TruncationWarning,
};
pub use pipeline::{DocQaSession, IngestionReport};
pub use retrieval::Retriever;
pub use router::{ContextBudget, Prompt, PromptRouter};
pub use traits::{ChatModel, Embedder};
