use crate::chunking::normalize_whitespace;
use crate::error::{ItemFailure, PipelineError, ProviderError};
use crate::models::EmbeddingVector;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 512;
pub const LOCAL_NGRAM_MODEL: &str = "local-ngram";

/// Number of single-text requests the default `embed_batch` keeps in flight.
const DEFAULT_ITEM_CONCURRENCY: usize = 4;

/// Turns text into fixed-dimension vectors.
///
/// Implementations never retry: a failed call surfaces as a [`ProviderError`]
/// and retry policy is left to whoever wraps the provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError>;

    /// Embeds every text, returning vectors in input order.
    ///
    /// Either all items succeed or the error lists every item that failed.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, BatchEmbedError> {
        let pending: Vec<_> = texts.iter().map(|text| self.embed(text)).collect();
        let results = stream::iter(pending)
            .buffered(DEFAULT_ITEM_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        collect_batch(results)
    }
}

#[derive(Debug)]
pub struct BatchEmbedError {
    pub total: usize,
    pub failures: Vec<(usize, ProviderError)>,
}

impl From<BatchEmbedError> for PipelineError {
    fn from(value: BatchEmbedError) -> Self {
        PipelineError::PartialFailure {
            total: value.total,
            failed: value
                .failures
                .into_iter()
                .map(|(index, error)| ItemFailure {
                    index,
                    reason: error.to_string(),
                })
                .collect(),
        }
    }
}

pub(crate) fn collect_batch(
    results: Vec<Result<EmbeddingVector, ProviderError>>,
) -> Result<Vec<EmbeddingVector>, BatchEmbedError> {
    let total = results.len();
    let mut vectors = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(vector) => vectors.push(vector),
            Err(error) => failures.push((index, error)),
        }
    }

    if failures.is_empty() {
        Ok(vectors)
    } else {
        Err(BatchEmbedError { total, failures })
    }
}

pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keeps the first `max_tokens` whitespace tokens, dropping the tail.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    text.split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalizes whitespace and applies the end-truncation policy.
pub fn prepare_input(text: &str, max_tokens: usize) -> Result<String, ProviderError> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Err(ProviderError::EmptyInput);
    }

    if count_tokens(&normalized) > max_tokens {
        Ok(truncate_tokens(&normalized, max_tokens))
    } else {
        Ok(normalized)
    }
}

/// Explicit model name to output dimension table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ModelDimensions(BTreeMap<String, usize>);

impl Default for ModelDimensions {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert("NV-Embed-QA".to_string(), 512);
        table.insert("text-embedding-ada-002".to_string(), 1536);
        table.insert(LOCAL_NGRAM_MODEL.to_string(), DEFAULT_EMBEDDING_DIMENSIONS);
        Self(table)
    }
}

impl ModelDimensions {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, model_name: impl Into<String>, dimension: usize) -> Self {
        self.0.insert(model_name.into(), dimension);
        self
    }

    pub fn dimension_for(&self, model_name: &str) -> Result<usize, PipelineError> {
        self.0.get(model_name).copied().ok_or_else(|| {
            PipelineError::Config(format!(
                "no dimension configured for embedding model {model_name}"
            ))
        })
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if let Some((model, _)) = self.0.iter().find(|(_, dimension)| **dimension == 0) {
            return Err(PipelineError::Config(format!(
                "embedding model {model} has a zero dimension"
            )));
        }
        Ok(())
    }
}

/// Offline embedder hashing character trigrams into a fixed number of buckets.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    pub max_input_tokens: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    fn hash_trigrams(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

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
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        LOCAL_NGRAM_MODEL
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        let input = prepare_input(text, self.max_input_tokens)?;
        Ok(EmbeddingVector::new(self.hash_trigrams(&input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        let second = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder::with_dimensions(32);
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.dimension(), 32);
    }

    #[tokio::test]
    async fn blank_input_is_rejected() {
        let embedder = CharacterNgramEmbedder::default();
        let result = embedder.embed(" \n\t ").await;
        assert!(matches!(result, Err(ProviderError::EmptyInput)));
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("alpha beta").await.unwrap());
        assert_eq!(batch[1], embedder.embed("gamma delta").await.unwrap());
    }

    #[tokio::test]
    async fn batch_wider_than_concurrency_keeps_order() {
        let embedder = CharacterNgramEmbedder::with_dimensions(16);
        let texts: Vec<String> = (0..10).map(|value| format!("pump reading {value}")).collect();

        let batch = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(batch.len(), 10);
        assert_eq!(batch[7], embedder.embed("pump reading 7").await.unwrap());
    }

    #[test]
    fn truncation_drops_trailing_tokens() {
        assert_eq!(truncate_tokens("one two three four", 2), "one two");
        assert_eq!(prepare_input("  one   two  ", 5).unwrap(), "one two");
        assert_eq!(prepare_input("a b c d e f", 3).unwrap(), "a b c");
    }

    #[test]
    fn dimension_table_resolves_known_models() {
        let table = ModelDimensions::default();
        assert_eq!(table.dimension_for("NV-Embed-QA").unwrap(), 512);
        assert_eq!(table.dimension_for("text-embedding-ada-002").unwrap(), 1536);
        assert!(matches!(
            table.dimension_for("unknown-model"),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn zero_dimension_fails_validation() {
        let table = ModelDimensions::empty().with("broken", 0);
        assert!(table.validate().is_err());
    }

    #[test]
    fn batch_collection_reports_every_failure() {
        let results = vec![
            Ok(EmbeddingVector::new(vec![1.0])),
            Err(ProviderError::Request("boom".to_string())),
            Err(ProviderError::EmptyInput),
        ];

        let error = collect_batch(results).unwrap_err();
        assert_eq!(error.total, 3);
        let indices: Vec<usize> = error.failures.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![1, 2]);
    }
}
