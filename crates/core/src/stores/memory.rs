use crate::chunking::cosine_similarity;
use crate::models::{IndexedRecord, ScoredChunk};
use crate::traits::{CreateOutcome, VectorBackend};
use crate::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct MemoryCollection {
    dimension: usize,
    records: Vec<IndexedRecord>,
}

/// Process-local backend. Every operation takes the map lock once, so
/// create, drop and insert are each applied whole.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(name: &str) -> StoreError {
    StoreError::BackendResponse {
        backend: "memory".to_string(),
        details: format!("collection {name} does not exist"),
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn collection_dimension(&self, name: &str) -> Result<Option<usize>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(name)
            .map(|collection| collection.dimension))
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<CreateOutcome, StoreError> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        collections.insert(
            name.to_string(),
            MemoryCollection {
                dimension,
                records: Vec::new(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn insert(&self, name: &str, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;

        if let Some(record) = records
            .iter()
            .find(|record| record.vector.dimension() != collection.dimension)
        {
            return Err(StoreError::Request(format!(
                "vector dimension {} != {}",
                record.vector.dimension(),
                collection.dimension
            )));
        }

        collection.records.extend_from_slice(records);
        Ok(())
    }

    async fn similarity_search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;

        let mut scored: Vec<(f64, &IndexedRecord)> = collection
            .records
            .iter()
            .map(|record| (cosine_similarity(vector, record.vector.as_slice()), record))
            .collect();

        // stable: equal scores stay in insertion order
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, record)| ScoredChunk {
                chunk_text: record.chunk_text.clone(),
                score,
                origin_document_id: record.origin_document_id.clone(),
                sequence_index: record.sequence_index,
                file_name: record.file_name.clone(),
                page_number: record.page_number,
            })
            .collect())
    }

    async fn count(&self, name: &str) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        Ok(collection.records.len() as u64)
    }

    async fn delete_by_document(&self, name: &str, document_id: &str) -> Result<u64, StoreError> {
        self.remove_where(name, |record| record.origin_document_id == document_id)
            .await
    }

    async fn delete_by_file_name(&self, name: &str, file_name: &str) -> Result<u64, StoreError> {
        self.remove_where(name, |record| record.file_name == file_name)
            .await
    }
}

impl MemoryBackend {
    async fn remove_where<F>(&self, name: &str, matches: F) -> Result<u64, StoreError>
    where
        F: Fn(&IndexedRecord) -> bool,
    {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;

        let before = collection.records.len();
        collection.records.retain(|record| !matches(record));
        Ok((before - collection.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddingVector;

    fn record(values: Vec<f32>, text: &str, document: &str) -> IndexedRecord {
        IndexedRecord {
            vector: EmbeddingVector::new(values),
            chunk_text: text.to_string(),
            origin_document_id: document.to_string(),
            sequence_index: 0,
            file_name: format!("{document}.pdf"),
            page_number: Some(1),
        }
    }

    #[tokio::test]
    async fn second_create_reports_existing_collection() {
        let backend = MemoryBackend::new();
        assert_eq!(
            backend.create_collection("docs", 2).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            backend.create_collection("docs", 4).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(backend.collection_dimension("docs").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn search_ranks_by_similarity_and_keeps_ties_stable() {
        let backend = MemoryBackend::new();
        backend.create_collection("docs", 2).await.unwrap();
        backend
            .insert(
                "docs",
                &[
                    record(vec![0.0, 1.0], "first tie", "a"),
                    record(vec![1.0, 0.0], "best", "a"),
                    record(vec![0.0, 2.0], "second tie", "b"),
                ],
            )
            .await
            .unwrap();

        let hits = backend.similarity_search("docs", &[1.0, 0.0], 3).await.unwrap();

        let texts: Vec<&str> = hits.iter().map(|hit| hit.chunk_text.as_str()).collect();
        assert_eq!(texts, vec!["best", "first tie", "second tie"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn insert_rejects_wrong_dimension() {
        let backend = MemoryBackend::new();
        backend.create_collection("docs", 2).await.unwrap();

        let result = backend
            .insert("docs", &[record(vec![1.0, 0.0, 0.0], "bad", "a")])
            .await;

        assert!(result.is_err());
        assert_eq!(backend.count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_document_only_removes_that_document() {
        let backend = MemoryBackend::new();
        backend.create_collection("docs", 1).await.unwrap();
        backend
            .insert(
                "docs",
                &[
                    record(vec![1.0], "a1", "a"),
                    record(vec![1.0], "b1", "b"),
                    record(vec![1.0], "a2", "a"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(backend.delete_by_document("docs", "a").await.unwrap(), 2);
        assert_eq!(backend.count("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_by_file_name_spans_documents() {
        let backend = MemoryBackend::new();
        backend.create_collection("docs", 1).await.unwrap();
        let mut page_two = record(vec![1.0], "a2", "a-p2");
        page_two.file_name = "a.pdf".to_string();
        backend
            .insert(
                "docs",
                &[record(vec![1.0], "a1", "a"), page_two, record(vec![1.0], "b1", "b")],
            )
            .await
            .unwrap();

        assert_eq!(backend.delete_by_file_name("docs", "a.pdf").await.unwrap(), 2);
        assert_eq!(backend.count("docs").await.unwrap(), 1);
    }
}
