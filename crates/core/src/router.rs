use crate::models::{Chunk, QueryRoute, ScoredChunk, TruncationWarning};
use serde::{Deserialize, Serialize};
use tracing::warn;

const ANSWER_SYSTEM: &str = "You are an assistant for question-answering tasks.\n\
Use the following pieces of retrieved context to answer the question.";

const SUMMARY_SYSTEM: &str = "You are an assistant for summarizing text.\n\
Summarize each section you are given and keep its key points.\n\
Explain the sections first, then finish with an overall summary.";

const GROUNDING_PREAMBLE: &str =
    "If you don't know the answer, say that you don't know. DON'T MAKE UP ANYTHING.";

const SECTION_SEPARATOR: &str = "\n\n";

const QUESTION_RULE: &str = "\n\n---\n\n";

/// System and user messages for one completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Document sections rendered into `user`, kept apart so they can be read
    /// back without parsing the message.
    #[serde(default)]
    pub context: String,
}

impl Prompt {
    pub fn char_len(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }
}

/// True for the `[document | section N]` line that opens every rendered section.
pub fn is_section_header(line: &str) -> bool {
    line.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.rsplit_once(" | section "))
        .is_some_and(|(_, index)| !index.is_empty() && index.parse::<u64>().is_ok())
}

/// Character allowance for a whole prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_chars: usize,
}

impl ContextBudget {
    pub fn for_model(
        context_tokens: usize,
        reserved_output_tokens: usize,
        chars_per_token: usize,
    ) -> Self {
        Self {
            max_chars: context_tokens
                .saturating_sub(reserved_output_tokens)
                .saturating_mul(chars_per_token),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            max_chars: usize::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryContext {
    pub prompt: Prompt,
    /// Chunks that made it into the prompt, in sequence order.
    pub chunks: Vec<Chunk>,
    pub truncation: Option<TruncationWarning>,
}

#[derive(Debug, Clone)]
pub struct AnswerContext {
    pub prompt: Prompt,
    pub sources: Vec<ScoredChunk>,
}

/// Picks the summarization path when the query contains a trigger word.
///
/// This is a substring test, so a factual question that happens to contain
/// "summary" is routed to summarization as well.
#[derive(Debug, Clone)]
pub struct PromptRouter {
    triggers: Vec<String>,
}

impl PromptRouter {
    pub fn new<I, S>(triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            triggers: triggers
                .into_iter()
                .map(|trigger| trigger.as_ref().trim().to_lowercase())
                .filter(|trigger| !trigger.is_empty())
                .collect(),
        }
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    pub fn classify(&self, query: &str) -> QueryRoute {
        let lowered = query.to_lowercase();
        if self
            .triggers
            .iter()
            .any(|trigger| lowered.contains(trigger.as_str()))
        {
            QueryRoute::Summarize
        } else {
            QueryRoute::Answer
        }
    }

    /// Retrieved chunks (most relevant first) followed by the question.
    /// Lowest-ranked chunks are dropped if the budget is exceeded.
    pub fn answer_prompt(
        &self,
        question: &str,
        hits: Vec<ScoredChunk>,
        budget: ContextBudget,
    ) -> AnswerContext {
        let sections: Vec<String> = hits.iter().map(|hit| render_section(&hit.chunk)).collect();
        let (prompt, kept) = fit_sections(ANSWER_SYSTEM, question, &sections, budget);

        if kept < hits.len() {
            warn!(
                kept,
                dropped = hits.len() - kept,
                "retrieved context exceeded the model budget"
            );
        }

        let mut sources = hits;
        sources.truncate(kept);
        AnswerContext { prompt, sources }
    }

    /// Every chunk in sequence order, cut from the end to fit the budget.
    pub fn summary_prompt<'a, I>(
        &self,
        request: &str,
        chunks: I,
        budget: ContextBudget,
    ) -> SummaryContext
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let mut chunks: Vec<Chunk> = chunks.into_iter().cloned().collect();
        chunks.sort_by_key(|chunk| chunk.sequence_index);

        let sections: Vec<String> = chunks.iter().map(render_section).collect();
        let (prompt, kept) = fit_sections(SUMMARY_SYSTEM, request, &sections, budget);

        let truncation = (kept < chunks.len()).then(|| TruncationWarning {
            kept_chunks: kept,
            dropped_chunks: chunks.len() - kept,
            budget_chars: budget.max_chars,
        });
        if let Some(warning) = &truncation {
            warn!(%warning, "summary context truncated");
        }

        chunks.truncate(kept);
        SummaryContext {
            prompt,
            chunks,
            truncation,
        }
    }
}

fn render_section(chunk: &Chunk) -> String {
    format!(
        "[{} | section {}]\n{}",
        chunk.document_id, chunk.sequence_index, chunk.text
    )
}

fn render_user(context: &str, question: &str) -> String {
    format!(
        "{GROUNDING_PREAMBLE}\n\n{context}{QUESTION_RULE}\
         Answer the question based on the above context: {question}"
    )
}

/// Keeps the longest prefix of `sections` whose prompt fits `budget`.
fn fit_sections(
    system: &str,
    question: &str,
    sections: &[String],
    budget: ContextBudget,
) -> (Prompt, usize) {
    let base = system.chars().count() + render_user("", question).chars().count();
    let mut used = base;
    let mut kept = 0;

    for (position, section) in sections.iter().enumerate() {
        let separator = if position == 0 {
            0
        } else {
            SECTION_SEPARATOR.len()
        };
        let cost = section.chars().count() + separator;
        if used.saturating_add(cost) > budget.max_chars {
            break;
        }
        used += cost;
        kept += 1;
    }

    let context = sections[..kept].join(SECTION_SEPARATOR);
    (
        Prompt {
            system: system.to_string(),
            user: render_user(&context, question),
            context,
        },
        kept,
    )
}
