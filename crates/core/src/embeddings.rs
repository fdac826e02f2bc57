use crate::error::{Result, ServiceError};
use crate::traits::{ensure_success, Embedder};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Offline embedder over hashed character trigrams. Deterministic, so it is
/// what tests and `--offline` runs index with.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_EMBEDDING_MODEL: &str = "models/embedding-001";
const GEMINI_EMBEDDING_DIMENSIONS: usize = 768;
const GEMINI_MAX_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiTaskType {
    RetrievalDocument,
    RetrievalQuery,
    SemanticSimilarity,
}

impl GeminiTaskType {
    fn as_str(self) -> &'static str {
        match self {
            Self::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            Self::RetrievalQuery => "RETRIEVAL_QUERY",
            Self::SemanticSimilarity => "SEMANTIC_SIMILARITY",
        }
    }
}

/// Google Generative Language embeddings.
///
/// Batches are embedded as retrieval documents and single texts as retrieval
/// queries unless a task type is pinned with [`GeminiEmbedder::with_task_type`].
pub struct GeminiEmbedder {
    endpoint: String,
    model: String,
    api_key: String,
    client: Client,
    dimensions: usize,
    task_type: Option<GeminiTaskType>,
}

impl GeminiEmbedder {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ServiceError::MissingCredential(
                "GOOGLE_API_KEY is empty".to_string(),
            ));
        }

        Ok(Self {
            endpoint: GEMINI_ENDPOINT.to_string(),
            model: GEMINI_EMBEDDING_MODEL.to_string(),
            api_key,
            client: Client::new(),
            dimensions: GEMINI_EMBEDDING_DIMENSIONS,
            task_type: None,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_task_type(mut self, task_type: GeminiTaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}:{method}", self.endpoint, self.model))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    fn request_body(&self, text: &str, task_type: GeminiTaskType) -> Value {
        json!({
            "model": self.model,
            "content": { "parts": [{ "text": text }] },
            "taskType": task_type.as_str(),
        })
    }

    async fn embed_group(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let task_type = self.task_type.unwrap_or(GeminiTaskType::RetrievalDocument);
        let requests = texts
            .iter()
            .map(|text| self.request_body(text, task_type))
            .collect::<Vec<_>>();

        let response = self
            .client
            .post(self.method_url("batchEmbedContents")?)
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        let parsed: Value = ensure_success("gemini", response).await?.json().await?;

        let embeddings = parsed
            .pointer("/embeddings")
            .and_then(Value::as_array)
            .ok_or_else(|| ServiceError::BackendResponse {
                backend: "gemini".to_string(),
                details: "response has no embeddings array".to_string(),
            })?;

        embeddings
            .iter()
            .map(|item| parse_values(item.pointer("/values")))
            .collect()
    }
}

fn parse_values(values: Option<&Value>) -> Result<Vec<f32>> {
    let values = values
        .and_then(Value::as_array)
        .ok_or_else(|| ServiceError::BackendResponse {
            backend: "gemini".to_string(),
            details: "embedding has no values".to_string(),
        })?;

    Ok(values
        .iter()
        .filter_map(Value::as_f64)
        .map(|value| value as f32)
        .collect())
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        GEMINI_MAX_BATCH
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = "gemini", text_len = text.len(), "embedding single text");

        let task_type = self.task_type.unwrap_or(GeminiTaskType::RetrievalQuery);
        let response = self
            .client
            .post(self.method_url("embedContent")?)
            .json(&self.request_body(text, task_type))
            .send()
            .await?;
        let parsed: Value = ensure_success("gemini", response).await?.json().await?;

        parse_values(parsed.pointer("/embedding/values"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(GEMINI_MAX_BATCH) {
            debug!(
                provider = "gemini",
                batch_size = group.len(),
                model = %self.model,
                "embedding batch"
            );
            vectors.extend(self.embed_group(group).await?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Quarterly revenue grew").await.ok();
        let second = embedder.embed("Quarterly revenue grew").await.ok();
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed_text("abc");
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn default_batch_embeds_each_text() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let vectors = embedder
            .embed_batch(&["first text", "second text"])
            .await
            .expect("offline embedding cannot fail");

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], embedder.embed_text("first text"));
    }

    #[test]
    fn gemini_requires_api_key() {
        assert!(matches!(
            GeminiEmbedder::new("  "),
            Err(ServiceError::MissingCredential(_))
        ));
    }

    #[test]
    fn gemini_urls_carry_model_method_and_key() {
        let embedder = GeminiEmbedder::new("secret")
            .expect("key is set")
            .with_endpoint("http://localhost:8080/v1beta/");
        let url = embedder
            .method_url("batchEmbedContents")
            .expect("url should parse");

        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1beta/models/embedding-001:batchEmbedContents?key=secret"
        );
    }

    #[test]
    fn gemini_values_are_parsed_as_floats() {
        let payload = json!({ "embedding": { "values": [0.5, -1.0, 2] } });
        let values = parse_values(payload.pointer("/embedding/values")).expect("values parse");
        assert_eq!(values, vec![0.5, -1.0, 2.0]);
    }
}
