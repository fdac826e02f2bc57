use crate::error::{QueryError, Result, ServiceError};
use crate::models::ModelId;
use crate::router::{is_section_header, Prompt};
use crate::traits::{ensure_success, with_timeout, ChatModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 500,
        }
    }
}

/// OpenAI-compatible chat completions served by Groq.
pub struct GroqChatModel {
    endpoint: String,
    api_key: String,
    client: Client,
    params: GenerationParams,
}

impl GroqChatModel {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ServiceError::MissingCredential(
                "GROQ_API_KEY is empty".to_string(),
            ));
        }

        Ok(Self {
            endpoint: GROQ_ENDPOINT.to_string(),
            api_key,
            client: Client::new(),
            params: GenerationParams::default(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    fn completions_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("{}/chat/completions", self.endpoint))?)
    }

    fn request_body(&self, prompt: &Prompt, model: ModelId) -> Value {
        json!({
            "model": model.provider_model(),
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": self.params.temperature,
            "top_p": self.params.top_p,
            "max_tokens": self.params.max_tokens,
            "stream": false,
        })
    }
}

fn completion_text(payload: &Value) -> Result<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::BackendResponse {
            backend: "groq".to_string(),
            details: "no choices returned".to_string(),
        })
}

#[async_trait]
impl ChatModel for GroqChatModel {
    fn name(&self) -> &str {
        "groq"
    }

    async fn complete(&self, prompt: &Prompt, model: ModelId) -> Result<String> {
        debug!(
            provider = "groq",
            model = model.provider_model(),
            prompt_chars = prompt.char_len(),
            "requesting completion"
        );

        let response = self
            .client
            .post(self.completions_url()?)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, model))
            .send()
            .await?;
        let payload: Value = ensure_success("groq", response).await?.json().await?;

        completion_text(&payload)
    }
}

/// Retries transient failures (transport, rate limit, timeout) a bounded
/// number of times with linear backoff. Other failures return at once.
pub struct RetryingChatModel<M> {
    inner: M,
    max_attempts: u32,
    backoff: Duration,
}

impl<M: ChatModel> RetryingChatModel<M> {
    pub fn new(inner: M, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

#[async_trait]
impl<M: ChatModel> ChatModel for RetryingChatModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, prompt: &Prompt, model: ModelId) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.inner.complete(prompt, model).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    warn!(attempt, %error, "completion failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Offline stand-in that answers with the leading characters of the prompt
/// context. Useful for dry runs that must not call a hosted model.
#[derive(Debug, Clone, Copy)]
pub struct ExtractiveChatModel {
    pub max_chars: usize,
}

impl Default for ExtractiveChatModel {
    fn default() -> Self {
        Self { max_chars: 600 }
    }
}

#[async_trait]
impl ChatModel for ExtractiveChatModel {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, prompt: &Prompt, _model: ModelId) -> Result<String> {
        let body = prompt
            .context
            .lines()
            .filter(|line| !line.trim().is_empty() && !is_section_header(line))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(body.chars().take(self.max_chars).collect())
    }
}

/// Runs one bounded completion call and reports failures as `Generation`.
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn generate(&self, prompt: &Prompt, model: ModelId) -> Result<String, QueryError> {
        with_timeout("generation", self.timeout, self.model.complete(prompt, model))
            .await
            .map_err(|source| QueryError::Generation {
                model: model.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyModel {
        calls: AtomicU32,
        failures: u32,
        rate_limited: bool,
    }

    #[async_trait]
    impl ChatModel for FlakyModel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _prompt: &Prompt, _model: ModelId) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.rate_limited {
                    return Err(ServiceError::RateLimited {
                        backend: "flaky".to_string(),
                        details: "429".to_string(),
                    });
                }
                return Err(ServiceError::BackendResponse {
                    backend: "flaky".to_string(),
                    details: "400 Bad Request".to_string(),
                });
            }
            Ok(format!("answer after {call} calls"))
        }
    }

    struct SlowModel;

    #[async_trait]
    impl ChatModel for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _prompt: &Prompt, _model: ModelId) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "system".to_string(),
            user: "user".to_string(),
            context: String::new(),
        }
    }

    #[test]
    fn groq_request_carries_provider_model_and_messages() {
        let model = GroqChatModel::new("key").expect("key is set");
        let body = model.request_body(&prompt(), ModelId::Llama33);

        assert_eq!(body["model"], "llama-3.3-70b-versatile");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn groq_completion_text_is_read_from_first_choice() {
        let payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": "42" } }]
        });
        assert_eq!(completion_text(&payload).ok(), Some("42".to_string()));
        assert!(completion_text(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn groq_endpoint_is_normalized() {
        let model = GroqChatModel::new("key")
            .expect("key is set")
            .with_endpoint("http://localhost:9000/v1/");
        let url = model.completions_url().expect("url should parse");
        assert_eq!(url.as_str(), "http://localhost:9000/v1/chat/completions");
    }

    #[tokio::test]
    async fn extractive_model_keeps_bracketed_document_lines() {
        let prompt = Prompt {
            context: "[manual.pdf | section 0]\n[1] Close valve A.\n\n\
                      [manual.pdf | section 1]\nOpen valve B."
                .to_string(),
            ..prompt()
        };

        let text = ExtractiveChatModel::default()
            .complete(&prompt, ModelId::Llama3)
            .await
            .expect("offline model never fails");

        assert_eq!(text, "[1] Close valve A. Open valve B.");
    }

    #[tokio::test]
    async fn retries_rate_limits_up_to_the_bound() {
        let model = RetryingChatModel::new(
            FlakyModel {
                calls: AtomicU32::new(0),
                failures: 2,
                rate_limited: true,
            },
            3,
            Duration::from_millis(1),
        );

        let text = model
            .complete(&prompt(), ModelId::Llama3)
            .await
            .expect("third attempt succeeds");
        assert_eq!(text, "answer after 3 calls");
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let model = RetryingChatModel::new(
            FlakyModel {
                calls: AtomicU32::new(0),
                failures: 1,
                rate_limited: false,
            },
            3,
            Duration::from_millis(1),
        );

        assert!(model.complete(&prompt(), ModelId::Llama3).await.is_err());
        assert_eq!(model.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generator_times_out_as_generation_error() {
        let generator = AnswerGenerator::new(Arc::new(SlowModel), Duration::from_millis(10));

        let result = generator.generate(&prompt(), ModelId::Llama31).await;

        match result {
            Err(QueryError::Generation { model, source }) => {
                assert_eq!(model, "llama3.1");
                assert!(matches!(source, ServiceError::Timeout { .. }));
            }
            other => panic!("expected generation timeout, got {other:?}"),
        }
    }
}
