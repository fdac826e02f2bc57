//! Faithfulness scores for generated summaries.
//!
//! Two scores are reported: a ROUGE-1 style unigram F-measure against the
//! reference text, and the cosine similarity of the two texts under a semantic
//! encoder. A metric that cannot be computed is reported as `0.0` with a
//! warning; evaluation never fails the request.

use crate::index::cosine_similarity;
use crate::models::EvaluationResult;
use crate::traits::{with_timeout, Embedder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LexicalOverlap {
    pub precision: f32,
    pub recall: f32,
    pub f_measure: f32,
}

fn unigram_counts(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        *counts.entry(token.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

/// Clipped unigram overlap between `summary` and `reference`.
pub fn lexical_overlap(summary: &str, reference: &str) -> LexicalOverlap {
    let summary_counts = unigram_counts(summary);
    let reference_counts = unigram_counts(reference);

    let summary_total: usize = summary_counts.values().sum();
    let reference_total: usize = reference_counts.values().sum();
    if summary_total == 0 || reference_total == 0 {
        return LexicalOverlap::default();
    }

    let overlap: usize = summary_counts
        .iter()
        .map(|(token, count)| (*count).min(reference_counts.get(token).copied().unwrap_or(0)))
        .sum();

    let precision = overlap as f32 / summary_total as f32;
    let recall = overlap as f32 / reference_total as f32;
    let f_measure = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    LexicalOverlap {
        precision,
        recall,
        f_measure,
    }
}

#[derive(Clone)]
pub struct SummaryEvaluator {
    encoder: Arc<dyn Embedder>,
    timeout: Duration,
    max_encoder_chars: usize,
}

impl SummaryEvaluator {
    pub fn new(encoder: Arc<dyn Embedder>, timeout: Duration, max_encoder_chars: usize) -> Self {
        Self {
            encoder,
            timeout,
            max_encoder_chars: max_encoder_chars.max(1),
        }
    }

    pub async fn evaluate(&self, summary: &str, reference: &str) -> EvaluationResult {
        let mut warnings = Vec::new();

        let lexical = lexical_overlap(summary, reference);
        if summary.trim().is_empty() {
            warn!("summary is empty; scoring it as zero");
            warnings.push("summary is empty".to_string());
        } else if reference.trim().is_empty() {
            warn!("reference text is empty; scoring the summary as zero");
            warnings.push("reference text is empty".to_string());
        }

        let semantic = if warnings.is_empty() {
            match self.semantic_similarity(summary, reference).await {
                Ok(score) => score,
                Err(reason) => {
                    warn!(%reason, "semantic similarity unavailable");
                    warnings.push(format!("semantic similarity unavailable: {reason}"));
                    0.0
                }
            }
        } else {
            0.0
        };

        EvaluationResult {
            lexical_overlap_score: lexical.f_measure,
            lexical_precision: lexical.precision,
            lexical_recall: lexical.recall,
            semantic_similarity_score: semantic,
            warnings,
        }
    }

    async fn semantic_similarity(&self, summary: &str, reference: &str) -> Result<f32, String> {
        let summary = truncate_chars(summary, self.max_encoder_chars);
        let reference = truncate_chars(reference, self.max_encoder_chars);

        let left = self.encode(summary).await?;
        let right = self.encode(reference).await?;

        if left.len() != right.len() || left.is_empty() {
            return Err(format!(
                "encoder returned mismatched dimensions {} and {}",
                left.len(),
                right.len()
            ));
        }
        Ok(cosine_similarity(&left, &right))
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, String> {
        with_timeout("semantic encoding", self.timeout, self.encoder.embed(text))
            .await
            .map_err(|error| error.to_string())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::{Result as ServiceResult, ServiceError};
    use async_trait::async_trait;

    struct DownEncoder;

    #[async_trait]
    impl Embedder for DownEncoder {
        fn model_id(&self) -> &str {
            "down"
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> ServiceResult<Vec<f32>> {
            Err(ServiceError::BackendResponse {
                backend: "encoder".to_string(),
                details: "502 Bad Gateway".to_string(),
            })
        }
    }

    fn evaluator() -> SummaryEvaluator {
        SummaryEvaluator::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Duration::from_secs(5),
            8_000,
        )
    }

    #[test]
    fn identical_text_has_full_overlap() {
        let overlap = lexical_overlap("The plant output rose", "the plant output rose");
        assert_eq!(overlap.f_measure, 1.0);
        assert_eq!(overlap.precision, 1.0);
        assert_eq!(overlap.recall, 1.0);
    }

    #[test]
    fn repeated_tokens_are_clipped() {
        let overlap = lexical_overlap("loss loss loss", "loss of revenue");
        assert!((overlap.precision - 1.0 / 3.0).abs() < 1e-6);
        assert!((overlap.recall - 1.0 / 3.0).abs() < 1e-6);
        assert!((overlap.f_measure - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_text_has_no_overlap() {
        assert_eq!(lexical_overlap("alpha beta", "gamma delta").f_measure, 0.0);
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[tokio::test]
    async fn identical_summary_scores_maximally() {
        let text = "Revenue grew in the third quarter while costs fell.";
        let result = evaluator().evaluate(text, text).await;

        assert_eq!(result.lexical_overlap_score, 1.0);
        assert!((result.semantic_similarity_score - 1.0).abs() < 1e-5);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn empty_summary_scores_zero_without_failing() {
        let result = evaluator().evaluate("", "Some reference text.").await;

        assert_eq!(result.lexical_overlap_score, 0.0);
        assert_eq!(result.semantic_similarity_score, 0.0);
        assert_eq!(result.warnings, vec!["summary is empty".to_string()]);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut bytes) = self.0.lock() {
                bytes.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLog {
        fn contents(&self) -> String {
            self.0
                .lock()
                .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn empty_inputs_are_logged_as_warnings() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        evaluator().evaluate("", "Some reference text.").await;
        evaluator().evaluate("A summary.", "  ").await;

        let output = log.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("summary is empty"));
        assert!(output.contains("reference text is empty"));
    }

    #[tokio::test]
    async fn encoder_failure_only_zeroes_the_semantic_score() {
        let evaluator =
            SummaryEvaluator::new(Arc::new(DownEncoder), Duration::from_secs(5), 8_000);

        let result = evaluator.evaluate("costs fell", "costs fell sharply").await;

        assert!(result.lexical_overlap_score > 0.0);
        assert_eq!(result.semantic_similarity_score, 0.0);
        assert_eq!(result.warnings.len(), 1);
    }
}
