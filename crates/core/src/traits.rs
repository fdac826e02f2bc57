use crate::error::{Result, ServiceError};
use crate::models::ModelId;
use crate::router::Prompt;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Text to fixed-dimension vector. Used both for the document index and,
/// through a separate instance, as the semantic encoder of the evaluator.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the embedding space; vectors from different ids never mix.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Most texts one `embed_batch` call sends in a single request. Callers
    /// that bound each request with a timeout split their input by this.
    fn max_batch_size(&self) -> usize {
        1
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// One completion call; returns the text verbatim.
    async fn complete(&self, prompt: &Prompt, model: ModelId) -> Result<String>;
}

pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| ServiceError::Timeout { operation, timeout })?
}

pub(crate) async fn ensure_success(
    backend: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let details = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(ServiceError::RateLimited {
            backend: backend.to_string(),
            details,
        })
    } else {
        Err(ServiceError::BackendResponse {
            backend: backend.to_string(),
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_calls_fail_with_timeout() {
        let result: Result<()> = with_timeout("embedding", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(ServiceError::Timeout {
                operation: "embedding",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let result = with_timeout("generation", Duration::from_secs(1), async {
            Ok::<_, ServiceError>(7)
        })
        .await;

        assert_eq!(result.ok(), Some(7));
    }
}
