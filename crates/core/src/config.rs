//! Configuration for the document Q&A pipeline.

use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use crate::generation::GenerationParams;
use crate::index::SimilarityMetric;
use crate::models::ModelId;
use crate::router::ContextBudget;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Overrides the input size of one chat model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelLimit {
    pub model: ModelId,
    pub context_tokens: usize,
}

/// Every tunable of the pipeline. Values are checked by [`PipelineConfig::validate`],
/// which all constructors run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Characters per chunk.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunks retrieved for a question.
    pub top_k: usize,
    /// Case-insensitive substrings that select the summarization path.
    pub summary_triggers: Vec<String>,
    pub similarity_metric: SimilarityMetric,
    /// Models not listed here use their default context size.
    pub context_limits: Vec<ModelLimit>,
    /// Conversion used to turn token limits into character budgets.
    pub chars_per_token: usize,
    pub generation: GenerationParams,
    pub embedding_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub encoder_timeout_secs: u64,
    /// Longest text handed to the semantic encoder.
    pub encoder_max_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 50,
            top_k: 4,
            summary_triggers: vec!["summary".to_string(), "summarize".to_string()],
            similarity_metric: SimilarityMetric::Cosine,
            context_limits: Vec::new(),
            chars_per_token: 4,
            generation: GenerationParams::default(),
            embedding_timeout_secs: 30,
            generation_timeout_secs: 60,
            encoder_timeout_secs: 30,
            encoder_max_chars: 8_000,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)?;

        if self.top_k == 0 {
            return Err(invalid("top_k must be greater than zero"));
        }
        if self.summary_triggers.is_empty() {
            return Err(invalid("summary_triggers must not be empty"));
        }
        if self
            .summary_triggers
            .iter()
            .any(|trigger| trigger.trim().is_empty())
        {
            return Err(invalid("summary_triggers must not contain blank entries"));
        }
        if self.chars_per_token == 0 {
            return Err(invalid("chars_per_token must be greater than zero"));
        }
        if self.encoder_max_chars == 0 {
            return Err(invalid("encoder_max_chars must be greater than zero"));
        }
        for (name, secs) in [
            ("embedding_timeout_secs", self.embedding_timeout_secs),
            ("generation_timeout_secs", self.generation_timeout_secs),
            ("encoder_timeout_secs", self.encoder_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        let params = &self.generation;
        if !(0.0..=2.0).contains(&params.temperature) {
            return Err(ConfigError::Invalid(format!(
                "generation.temperature ({}) must be within [0, 2]",
                params.temperature
            )));
        }
        if !(params.top_p > 0.0 && params.top_p <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "generation.top_p ({}) must be within (0, 1]",
                params.top_p
            )));
        }
        if params.max_tokens == 0 {
            return Err(invalid("generation.max_tokens must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for limit in &self.context_limits {
            if !seen.insert(limit.model) {
                return Err(ConfigError::Invalid(format!(
                    "context limit for {} is given twice",
                    limit.model
                )));
            }
        }
        for model in ModelId::ALL {
            let tokens = self.context_tokens(model);
            if tokens <= params.max_tokens as usize {
                return Err(ConfigError::Invalid(format!(
                    "context limit for {model} ({tokens}) must exceed generation.max_tokens ({})",
                    params.max_tokens
                )));
            }
        }

        Ok(())
    }

    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    pub fn context_tokens(&self, model: ModelId) -> usize {
        self.context_limits
            .iter()
            .find(|limit| limit.model == model)
            .map(|limit| limit.context_tokens)
            .unwrap_or_else(|| model.default_context_tokens())
    }

    /// Prompt allowance for `model` after reserving room for the completion.
    pub fn context_budget(&self, model: ModelId) -> ContextBudget {
        ContextBudget::for_model(
            self.context_tokens(model),
            self.generation.max_tokens as usize,
            self.chars_per_token,
        )
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn encoder_timeout(&self) -> Duration {
        Duration::from_secs(self.encoder_timeout_secs)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

/// Builder for a validated [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn summary_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.summary_triggers = triggers.into_iter().map(Into::into).collect();
        self
    }

    pub fn similarity_metric(mut self, metric: SimilarityMetric) -> Self {
        self.config.similarity_metric = metric;
        self
    }

    pub fn context_limit(mut self, model: ModelId, context_tokens: usize) -> Self {
        self.config.context_limits.retain(|limit| limit.model != model);
        self.config.context_limits.push(ModelLimit {
            model,
            context_tokens,
        });
        self
    }

    pub fn chars_per_token(mut self, chars: usize) -> Self {
        self.config.chars_per_token = chars;
        self
    }

    pub fn generation(mut self, params: GenerationParams) -> Self {
        self.config.generation = params;
        self
    }

    pub fn timeouts(
        mut self,
        embedding_secs: u64,
        generation_secs: u64,
        encoder_secs: u64,
    ) -> Self {
        self.config.embedding_timeout_secs = embedding_secs;
        self.config.generation_timeout_secs = generation_secs;
        self.config.encoder_timeout_secs = encoder_secs;
        self
    }

    pub fn encoder_max_chars(mut self, chars: usize) -> Self {
        self.config.encoder_max_chars = chars;
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
