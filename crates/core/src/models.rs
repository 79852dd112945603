use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceMetadata {
    pub file_name: String,
    pub page_number: Option<u32>,
    pub total_pages: Option<u32>,
}

/// One unit of parsed text, typically a single page of a source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub source_metadata: SourceMetadata,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_metadata: SourceMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, source_metadata: SourceMetadata) -> Self {
        self.source_metadata = source_metadata;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub origin_document_id: String,
    /// Position of this chunk within its document, starting at zero.
    pub sequence_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EmbeddingVector {
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedRecord {
    pub vector: EmbeddingVector,
    pub chunk_text: String,
    pub origin_document_id: String,
    pub sequence_index: u64,
    /// Source file the chunk was parsed from, empty when unknown.
    pub file_name: String,
    pub page_number: Option<u32>,
}

impl IndexedRecord {
    pub fn from_chunk(chunk: Chunk, vector: EmbeddingVector, source: &SourceMetadata) -> Self {
        Self {
            vector,
            chunk_text: chunk.text,
            origin_document_id: chunk.origin_document_id,
            sequence_index: chunk.sequence_index,
            file_name: source.file_name.clone(),
            page_number: source.page_number,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk_text: String,
    pub score: f64,
    pub origin_document_id: String,
    pub sequence_index: u64,
    pub file_name: String,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub matched_chunks: Vec<ScoredChunk>,
    pub answer_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub collection: String,
    pub documents_indexed: usize,
    pub chunks_indexed: usize,
    pub completed_at: DateTime<Utc>,
}
