use crate::chunking::{ChunkingConfig, SemanticChunker};
use crate::embeddings::{EmbeddingProvider, ModelDimensions};
use crate::error::{PipelineError, Result};
use crate::manager::{CollectionState, VectorStoreManager};
use crate::models::{Chunk, Document, IndexReport, IndexedRecord};
use crate::traits::VectorBackend;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Chunks, embeds and stores documents.
///
/// Every chunk of a call is embedded before anything is written, so a
/// provider failure leaves the collection untouched. Records are then
/// written one document at a time; cancellation is observed between
/// documents only and keeps what was written. A failed write removes the
/// documents this call already wrote before the error is returned.
pub struct IndexingPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
}

impl IndexingPipeline {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(PipelineError::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            embedder,
            dimension,
        })
    }

    /// Resolves the output dimension of the embedder's model from `dimensions`.
    pub fn from_model_table(
        embedder: Arc<dyn EmbeddingProvider>,
        dimensions: &ModelDimensions,
    ) -> Result<Self> {
        let dimension = dimensions.dimension_for(embedder.model_name())?;
        Self::new(embedder, dimension)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn index<B: VectorBackend>(
        &self,
        store: &VectorStoreManager<B>,
        documents: &[Document],
        chunk_config: &ChunkingConfig,
    ) -> Result<IndexReport> {
        self.index_with_cancel(store, documents, chunk_config, &CancellationToken::new())
            .await
    }

    pub async fn index_with_cancel<B: VectorBackend>(
        &self,
        store: &VectorStoreManager<B>,
        documents: &[Document],
        chunk_config: &ChunkingConfig,
        cancel: &CancellationToken,
    ) -> Result<IndexReport> {
        if documents.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "no documents to index".to_string(),
            ));
        }

        let state = match store.state().await {
            CollectionState::Uninitialized => store.connect().await?,
            state => state,
        };
        self.check_dimension(store.name(), state)?;

        let chunker = SemanticChunker::new(self.embedder.clone(), *chunk_config)?;
        let mut per_document: Vec<Vec<Chunk>> = Vec::with_capacity(documents.len());
        for document in documents {
            if cancel.is_cancelled() {
                return Err(cancelled(0, 0));
            }
            let chunks = chunker.chunk_document(document).await?;
            debug!(document_id = %document.id, chunk_count = chunks.len(), "document chunked");
            per_document.push(chunks);
        }

        let texts: Vec<String> = per_document
            .iter()
            .flatten()
            .map(|chunk| chunk.text.clone())
            .collect();
        let mut vectors = if texts.is_empty() {
            Vec::new().into_iter()
        } else {
            self.embedder.embed_batch(&texts).await?.into_iter()
        };

        if let Some(vector) = vectors
            .as_slice()
            .iter()
            .find(|vector| vector.dimension() != self.dimension)
        {
            return Err(PipelineError::DimensionMismatch {
                collection: store.name().to_string(),
                expected: self.dimension,
                actual: vector.dimension(),
            });
        }

        store.create(self.dimension).await?;
        self.check_dimension(store.name(), store.state().await)?;

        let mut documents_indexed = 0;
        let mut chunks_indexed = 0;
        let mut written: Vec<&str> = Vec::new();
        for (document, chunks) in documents.iter().zip(per_document) {
            if cancel.is_cancelled() {
                info!(
                    collection = %store.name(),
                    documents_indexed,
                    chunks_indexed,
                    "indexing cancelled"
                );
                return Err(cancelled(documents_indexed, chunks_indexed));
            }

            let records: Vec<IndexedRecord> = chunks
                .into_iter()
                .zip(vectors.by_ref())
                .map(|(chunk, vector)| {
                    IndexedRecord::from_chunk(chunk, vector, &document.source_metadata)
                })
                .collect();

            written.push(document.id.as_str());
            match store.upsert(&records).await {
                Ok(count) => chunks_indexed += count,
                Err(error) => {
                    let error =
                        roll_back(store, &written, documents_indexed, chunks_indexed, error).await;
                    return Err(error);
                }
            }
            documents_indexed += 1;
            debug!(document_id = %document.id, records = records.len(), "document indexed");
        }

        info!(
            collection = %store.name(),
            documents_indexed,
            chunks_indexed,
            "indexing finished"
        );

        Ok(IndexReport {
            collection: store.name().to_string(),
            documents_indexed,
            chunks_indexed,
            completed_at: Utc::now(),
        })
    }

    fn check_dimension(&self, collection: &str, state: CollectionState) -> Result<()> {
        match state {
            CollectionState::Active { dimension } if dimension != self.dimension => {
                Err(PipelineError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: dimension,
                    actual: self.dimension,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Deletes the records of `written` after a failed upsert. The failing
/// document is included since a backend may have stored part of it.
async fn roll_back<B: VectorBackend>(
    store: &VectorStoreManager<B>,
    written: &[&str],
    documents_committed: usize,
    chunks_committed: usize,
    error: PipelineError,
) -> PipelineError {
    warn!(
        collection = %store.name(),
        documents = written.len(),
        error = %error,
        "upsert failed, removing records written by this call"
    );

    let mut seen: Vec<&str> = Vec::with_capacity(written.len());
    for &document_id in written {
        if seen.contains(&document_id) {
            continue;
        }
        seen.push(document_id);
        if let Err(rollback_error) = store.delete_document(document_id).await {
            warn!(document_id, error = %rollback_error, "rollback delete failed");
            return PipelineError::PartialCommit {
                documents_committed,
                chunks_committed,
                source: Box::new(error),
            };
        }
    }
    error
}

fn cancelled(documents_committed: usize, chunks_committed: usize) -> PipelineError {
    PipelineError::Cancelled {
        documents_committed,
        chunks_committed,
    }
}
