use crate::error::StoreError;
use crate::models::{IndexedRecord, ScoredChunk};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Backing vector database, addressed by collection name.
///
/// `create_collection` must report a collection that already exists as
/// [`CreateOutcome::AlreadyExists`] rather than an error, and
/// `drop_collection` must either remove the collection entirely or leave it
/// untouched.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Dimension recorded in the collection metadata, `None` when absent.
    async fn collection_dimension(&self, name: &str) -> Result<Option<usize>, StoreError>;

    async fn create_collection(&self, name: &str, dimension: usize)
        -> Result<CreateOutcome, StoreError>;

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn insert(&self, name: &str, records: &[IndexedRecord]) -> Result<(), StoreError>;

    /// Best matches first; equal scores keep insertion order.
    async fn similarity_search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn count(&self, name: &str) -> Result<u64, StoreError>;

    /// Removes every record of one document, returning how many were removed.
    async fn delete_by_document(&self, name: &str, document_id: &str) -> Result<u64, StoreError>;

    /// Removes every record parsed from one source file.
    async fn delete_by_file_name(&self, name: &str, file_name: &str) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;
}
