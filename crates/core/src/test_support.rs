use crate::embeddings::EmbeddingProvider;
use crate::error::{ProviderError, StoreError};
use crate::generation::{AnswerGenerator, NO_GROUNDING_ANSWER};
use crate::models::{EmbeddingVector, IndexedRecord, ScoredChunk};
use crate::stores::MemoryBackend;
use crate::traits::{CreateOutcome, VectorBackend};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Deterministic embedder where dimension `i` counts occurrences of topic word `i`.
pub(crate) struct TopicEmbedder {
    topics: Vec<String>,
    failing_marker: Option<String>,
    pub calls: AtomicUsize,
}

impl TopicEmbedder {
    pub fn new(topics: &[&str]) -> Self {
        Self {
            topics: topics.iter().map(|topic| topic.to_lowercase()).collect(),
            failing_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Any text containing `marker` fails to embed.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.failing_marker = Some(marker.to_string());
        self
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-test"
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyInput);
        }
        if let Some(marker) = &self.failing_marker {
            if text.contains(marker.as_str()) {
                return Err(ProviderError::Request(format!("refused text containing {marker}")));
            }
        }

        let mut values = vec![0f32; self.topics.len()];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|ch: char| !ch.is_alphanumeric())
                .to_lowercase();
            if let Some(position) = self.topics.iter().position(|topic| *topic == word) {
                values[position] += 1.0;
            }
        }
        Ok(EmbeddingVector::new(values))
    }
}

/// Answers with a fixed sentence and counts how often it was asked.
#[derive(Default)]
pub(crate) struct RecordingGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    async fn synthesize(&self, _query: &str, context: &[ScoredChunk]) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if context.is_empty() {
            return Ok(NO_GROUNDING_ANSWER.to_string());
        }
        Ok(format!("answer grounded on {} chunks", context.len()))
    }
}

/// Memory backend with scripted failures and hooks.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    inner: MemoryBackend,
    inserts: AtomicUsize,
    refuse_drop: bool,
    refuse_delete: bool,
    failing_insert: Option<usize>,
    cancel_after_insert: Option<(usize, CancellationToken)>,
}

impl ScriptedBackend {
    pub fn refusing_drop() -> Self {
        Self {
            refuse_drop: true,
            ..Self::default()
        }
    }

    /// The `number`th insert call (starting at 1) fails without writing.
    pub fn failing_insert(number: usize) -> Self {
        Self {
            failing_insert: Some(number),
            ..Self::default()
        }
    }

    /// Every delete by document or file name fails.
    pub fn with_refused_delete(mut self) -> Self {
        self.refuse_delete = true;
        self
    }

    /// Cancels `token` once the `number`th insert call has been written.
    pub fn cancelling_after_insert(number: usize, token: CancellationToken) -> Self {
        Self {
            cancel_after_insert: Some((number, token)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl VectorBackend for ScriptedBackend {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.collection_exists(name).await
    }

    async fn collection_dimension(&self, name: &str) -> Result<Option<usize>, StoreError> {
        self.inner.collection_dimension(name).await
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<CreateOutcome, StoreError> {
        self.inner.create_collection(name, dimension).await
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        if self.refuse_drop {
            return Err(StoreError::BackendResponse {
                backend: "scripted".to_string(),
                details: format!("drop of {name} refused"),
            });
        }
        self.inner.drop_collection(name).await
    }

    async fn insert(&self, name: &str, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let number = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_insert == Some(number) {
            return Err(StoreError::Request(format!("insert {number} refused")));
        }

        self.inner.insert(name, records).await?;
        if let Some((after, token)) = &self.cancel_after_insert {
            if *after == number {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.inner.similarity_search(name, vector, top_k).await
    }

    async fn count(&self, name: &str) -> Result<u64, StoreError> {
        self.inner.count(name).await
    }

    async fn delete_by_document(&self, name: &str, document_id: &str) -> Result<u64, StoreError> {
        if self.refuse_delete {
            return Err(StoreError::Request(format!("delete of {document_id} refused")));
        }
        self.inner.delete_by_document(name, document_id).await
    }

    async fn delete_by_file_name(&self, name: &str, file_name: &str) -> Result<u64, StoreError> {
        if self.refuse_delete {
            return Err(StoreError::Request(format!("delete of {file_name} refused")));
        }
        self.inner.delete_by_file_name(name, file_name).await
    }
}
