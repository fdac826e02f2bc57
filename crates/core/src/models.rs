use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// An uploaded document before extraction. Dropped once its text is read.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub document_id: String,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(document_id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            document_id: document_id.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub sequence_index: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueryRoute {
    Summarize,
    Answer,
}

/// Chat models the generator can be pointed at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelId {
    #[serde(rename = "llama3")]
    Llama3,
    #[serde(rename = "llama3.1")]
    Llama31,
    #[serde(rename = "llama3.3")]
    Llama33,
}

impl ModelId {
    pub const ALL: [ModelId; 3] = [ModelId::Llama3, ModelId::Llama31, ModelId::Llama33];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Llama3 => "llama3",
            Self::Llama31 => "llama3.1",
            Self::Llama33 => "llama3.3",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Llama3 => "Llama3",
            Self::Llama31 => "Llama3.1",
            Self::Llama33 => "Llama3.3",
        }
    }

    /// Model name sent to the completion endpoint.
    pub fn provider_model(self) -> &'static str {
        match self {
            Self::Llama3 => "llama3-70b-8192",
            Self::Llama31 => "llama-3.1-70b-versatile",
            Self::Llama33 => "llama-3.3-70b-versatile",
        }
    }

    pub fn default_context_tokens(self) -> usize {
        match self {
            Self::Llama3 => 8_192,
            Self::Llama31 | Self::Llama33 => 131_072,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|model| {
                wanted.eq_ignore_ascii_case(model.as_str())
                    || wanted.eq_ignore_ascii_case(model.provider_model())
            })
            .ok_or_else(|| ConfigError::UnknownModel(value.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub model: ModelId,
}

impl Query {
    pub fn new(text: impl Into<String>, model: ModelId) -> Self {
        Self {
            text: text.into(),
            model,
        }
    }
}

/// Chunks left out of a summarization context because of the model's input budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TruncationWarning {
    pub kept_chunks: usize,
    pub dropped_chunks: usize,
    pub budget_chars: usize,
}

impl fmt::Display for TruncationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "context truncated to {} of {} chunks ({} character budget)",
            self.kept_chunks,
            self.kept_chunks + self.dropped_chunks,
            self.budget_chars
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EvaluationResult {
    /// Unigram F-measure in `[0, 1]`.
    pub lexical_overlap_score: f32,
    pub lexical_precision: f32,
    pub lexical_recall: f32,
    /// Cosine similarity in `[-1, 1]`.
    pub semantic_similarity_score: f32,
    /// Metrics that could not be computed and were reported as zero.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryResponse {
    Answer {
        text: String,
        sources: Vec<ScoredChunk>,
        elapsed: Duration,
    },
    Summary {
        text: String,
        evaluation: EvaluationResult,
        truncation: Option<TruncationWarning>,
        elapsed: Duration,
    },
}

impl QueryResponse {
    pub fn text(&self) -> &str {
        match self {
            Self::Answer { text, .. } | Self::Summary { text, .. } => text,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Answer { elapsed, .. } | Self::Summary { elapsed, .. } => *elapsed,
        }
    }
}
