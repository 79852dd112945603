pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod indexing;
pub mod ingest;
pub mod manager;
pub mod models;
pub mod providers;
pub mod query;
pub mod stores;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use chunking::{normalize_whitespace, ChunkingConfig, SemanticChunker, SentenceSplitter};
pub use config::{
    BackendKind, EmbeddingConfig, EmbeddingProviderKind, GenerationConfig, GeneratorKind,
    PipelineConfig, RetrievalConfig, VectorStoreConfig,
};
pub use embeddings::{
    BatchEmbedError, CharacterNgramEmbedder, EmbeddingProvider, ModelDimensions,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ItemFailure, ParsingError, PipelineError, ProviderError, StoreError};
pub use extractor::{DocumentParser, FileParser, FileType};
pub use generation::{AnswerGenerator, ExtractiveGenerator, SamplingParams};
pub use indexing::IndexingPipeline;
pub use ingest::{load_documents, FilesystemStorage};
pub use manager::{CollectionState, CreateStatus, ResetStatus, VectorStoreManager};
pub use models::{
    Chunk, Document, EmbeddingVector, IndexReport, IndexedRecord, QueryResult, ScoredChunk,
    SourceMetadata,
};
pub use providers::{build_embedder, build_generator};
pub use query::QueryPipeline;
pub use stores::{MemoryBackend, QdrantBackend};
pub use traits::{CreateOutcome, ObjectStorage, VectorBackend};
