use crate::error::ProviderError;
use crate::models::ScoredChunk;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const NO_GROUNDING_ANSWER: &str =
    "No indexed content matched this question, so there is nothing to ground an answer on.";

const SYSTEM_PROMPT: &str = "You answer questions using only the provided context chunks. \
If the context does not contain the answer, say that you could not find it in the indexed documents.";

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produces an answer for `query` grounded on `context`, which may be empty.
    async fn synthesize(&self, query: &str, context: &[ScoredChunk]) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.7,
            max_tokens: 1024,
        }
    }
}

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// User message carrying the numbered context chunks followed by the question.
pub fn build_prompt(query: &str, context: &[ScoredChunk]) -> String {
    let mut prompt = String::new();

    if context.is_empty() {
        prompt.push_str("Context: (no matching chunks were found)\n\n");
    } else {
        prompt.push_str("Context:\n");
        for (rank, chunk) in context.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", rank + 1, chunk.chunk_text));
        }
        prompt.push('\n');
    }

    prompt.push_str("Question: ");
    prompt.push_str(query.trim());
    prompt
}

/// Offline generator that answers with the best matching chunk verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveGenerator;

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    async fn synthesize(&self, _query: &str, context: &[ScoredChunk]) -> Result<String, ProviderError> {
        Ok(context
            .first()
            .map(|chunk| chunk.chunk_text.clone())
            .unwrap_or_else(|| NO_GROUNDING_ANSWER.to_string()))
    }
}
