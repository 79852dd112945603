use crate::embeddings::EmbeddingProvider;
use crate::error::{PipelineError, Result};
use crate::generation::AnswerGenerator;
use crate::manager::{CollectionState, VectorStoreManager};
use crate::models::QueryResult;
use crate::traits::VectorBackend;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_TOP_K: usize = 4;

/// Embeds a question, retrieves the closest chunks and asks the generator
/// for an answer grounded on them.
pub struct QueryPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
    default_top_k: usize,
}

impl QueryPipeline {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, generator: Arc<dyn AnswerGenerator>) -> Self {
        Self {
            embedder,
            generator,
            default_top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k.max(1);
        self
    }

    pub async fn query<B: VectorBackend>(
        &self,
        store: &VectorStoreManager<B>,
        text: &str,
        top_k: Option<usize>,
    ) -> Result<QueryResult> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidArgument("query is empty".to_string()));
        }

        if !matches!(store.state().await, CollectionState::Active { .. }) {
            return Err(PipelineError::CollectionNotFound(store.name().to_string()));
        }

        let top_k = top_k.unwrap_or(self.default_top_k);
        let vector = self.embedder.embed(text).await?;
        let matched_chunks = store.search(vector.as_slice(), top_k).await?;

        // an empty context still goes to the generator
        let answer_text = self.generator.synthesize(text, &matched_chunks).await?;

        info!(
            collection = %store.name(),
            top_k,
            matched = matched_chunks.len(),
            "query answered"
        );

        Ok(QueryResult {
            query: text.to_string(),
            matched_chunks,
            answer_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::generation::NO_GROUNDING_ANSWER;
    use crate::indexing::IndexingPipeline;
    use crate::models::Document;
    use crate::stores::MemoryBackend;
    use crate::test_support::{RecordingGenerator, TopicEmbedder};
    use std::sync::atomic::Ordering;

    const TOPICS: [&str; 3] = ["pump", "invoice", "garden"];

    fn pipelines(
        generator: Arc<RecordingGenerator>,
    ) -> (IndexingPipeline, QueryPipeline) {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TopicEmbedder::new(&TOPICS));
        (
            IndexingPipeline::new(embedder.clone(), TOPICS.len()).unwrap(),
            QueryPipeline::new(embedder, generator).with_default_top_k(3),
        )
    }

    #[tokio::test]
    async fn answer_chunk_ranks_first() {
        let generator = Arc::new(RecordingGenerator::default());
        let (indexing, querying) = pipelines(generator.clone());
        let store = VectorStoreManager::open(Arc::new(MemoryBackend::new()), "docs")
            .await
            .unwrap();
        let documents = vec![
            Document::new("a", "The pump moves water through the plant."),
            Document::new("b", "Every invoice must be paid within thirty days."),
            Document::new("c", "The garden needs watering twice a week."),
        ];
        indexing
            .index(&store, &documents, &ChunkingConfig::default())
            .await
            .unwrap();

        let result = querying
            .query(&store, "When must an invoice be paid?", None)
            .await
            .unwrap();

        assert_eq!(result.matched_chunks.len(), 3);
        assert_eq!(
            result.matched_chunks[0].chunk_text,
            "Every invoice must be paid within thirty days."
        );
        assert!(result.matched_chunks[0].score > result.matched_chunks[1].score);
        assert_eq!(result.answer_text, "answer grounded on 3 chunks");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_collection_still_reaches_the_generator() {
        let generator = Arc::new(RecordingGenerator::default());
        let (_, querying) = pipelines(generator.clone());
        let store = VectorStoreManager::open(Arc::new(MemoryBackend::new()), "docs")
            .await
            .unwrap();
        store.create(TOPICS.len()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        let result = querying.query(&store, "anything", None).await.unwrap();

        assert!(result.matched_chunks.is_empty());
        assert_eq!(result.answer_text, NO_GROUNDING_ANSWER);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn absent_collection_fails_fast() {
        let generator = Arc::new(RecordingGenerator::default());
        let embedder = Arc::new(TopicEmbedder::new(&TOPICS));
        let querying = QueryPipeline::new(embedder.clone(), generator.clone());
        let store = VectorStoreManager::open(Arc::new(MemoryBackend::new()), "docs")
            .await
            .unwrap();

        let result = querying.query(&store, "pump?", None).await;

        assert!(matches!(result, Err(PipelineError::CollectionNotFound(_))));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unconnected_store_is_reported_as_missing() {
        let (_, querying) = pipelines(Arc::new(RecordingGenerator::default()));
        let store = VectorStoreManager::new(Arc::new(MemoryBackend::new()), "docs");

        let result = querying.query(&store, "pump?", Some(2)).await;
        assert!(matches!(result, Err(PipelineError::CollectionNotFound(_))));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let (_, querying) = pipelines(Arc::new(RecordingGenerator::default()));
        let store = VectorStoreManager::new(Arc::new(MemoryBackend::new()), "docs");

        let result = querying.query(&store, "   ", None).await;
        assert!(matches!(result, Err(PipelineError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn explicit_top_k_limits_matches() {
        let (indexing, querying) = pipelines(Arc::new(RecordingGenerator::default()));
        let store = VectorStoreManager::open(Arc::new(MemoryBackend::new()), "docs")
            .await
            .unwrap();
        let documents = vec![
            Document::new("a", "The pump hums."),
            Document::new("b", "The pump stops."),
            Document::new("c", "The garden grows."),
        ];
        indexing
            .index(&store, &documents, &ChunkingConfig::default())
            .await
            .unwrap();

        let result = querying.query(&store, "pump", Some(1)).await.unwrap();

        assert_eq!(result.matched_chunks.len(), 1);
        assert_eq!(result.matched_chunks[0].origin_document_id, "a");
    }
}
