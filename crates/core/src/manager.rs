//! Lifecycle of the single named collection a pipeline writes to and reads from.
//!
//! ```text
//! UNINITIALIZED --connect--> ABSENT | ACTIVE
//! ABSENT --create(dimension)--> ACTIVE
//! ACTIVE --reset--> ABSENT
//! ```

use crate::error::{PipelineError, Result};
use crate::models::{IndexedRecord, ScoredChunk};
use crate::traits::{CreateOutcome, VectorBackend};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Uninitialized,
    Absent,
    Active { dimension: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    Created,
    AlreadyInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
    Dropped,
    NothingToReset,
}

/// Handle on one named collection.
///
/// The state lock is held for the whole of each backend call: in-process
/// writers and readers share it, `create` and `reset` take it exclusively.
/// Nothing here coordinates with other processes using the same collection.
pub struct VectorStoreManager<B: VectorBackend> {
    backend: Arc<B>,
    name: String,
    state: RwLock<CollectionState>,
}

impl<B: VectorBackend> VectorStoreManager<B> {
    pub fn new(backend: Arc<B>, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
            state: RwLock::new(CollectionState::Uninitialized),
        }
    }

    /// Builds a manager and immediately looks the collection up.
    pub async fn open(backend: Arc<B>, name: impl Into<String>) -> Result<Self> {
        let manager = Self::new(backend, name);
        manager.connect().await?;
        Ok(manager)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CollectionState {
        *self.state.read().await
    }

    pub async fn dimension(&self) -> Option<usize> {
        match self.state().await {
            CollectionState::Active { dimension } => Some(dimension),
            _ => None,
        }
    }

    pub async fn connect(&self) -> Result<CollectionState> {
        let mut state = self.state.write().await;
        *state = self.lookup().await?;
        Ok(*state)
    }

    async fn lookup(&self) -> Result<CollectionState> {
        let exists = self
            .backend
            .collection_exists(&self.name)
            .await
            .map_err(|error| PipelineError::store("connect", &self.name, error))?;
        if !exists {
            info!(collection = %self.name, "collection does not exist yet");
            return Ok(CollectionState::Absent);
        }

        let dimension = self
            .backend
            .collection_dimension(&self.name)
            .await
            .map_err(|error| PipelineError::store("connect", &self.name, error))?;

        Ok(match dimension {
            Some(dimension) => {
                info!(collection = %self.name, dimension, "reusing existing collection");
                CollectionState::Active { dimension }
            }
            None => CollectionState::Absent,
        })
    }

    /// Creates the collection if it is absent. Idempotent: an active
    /// collection, or one created concurrently elsewhere, keeps its dimension.
    pub async fn create(&self, dimension: usize) -> Result<CreateStatus> {
        if dimension == 0 {
            return Err(PipelineError::InvalidArgument(
                "collection dimension must be positive".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if *state == CollectionState::Uninitialized {
            *state = self.lookup().await?;
        }

        if let CollectionState::Active { dimension: existing } = *state {
            if existing != dimension {
                warn!(
                    collection = %self.name,
                    existing,
                    requested = dimension,
                    "collection already initialized with a different dimension"
                );
            }
            return Ok(CreateStatus::AlreadyInitialized);
        }

        let outcome = self
            .backend
            .create_collection(&self.name, dimension)
            .await
            .map_err(|error| PipelineError::store("create", &self.name, error))?;

        match outcome {
            CreateOutcome::Created => {
                info!(collection = %self.name, dimension, "created collection");
                *state = CollectionState::Active { dimension };
                Ok(CreateStatus::Created)
            }
            CreateOutcome::AlreadyExists => {
                let stored = self
                    .backend
                    .collection_dimension(&self.name)
                    .await
                    .map_err(|error| PipelineError::store("create", &self.name, error))?
                    .unwrap_or(dimension);
                info!(
                    collection = %self.name,
                    dimension = stored,
                    "collection created concurrently, reusing it"
                );
                *state = CollectionState::Active { dimension: stored };
                Ok(CreateStatus::AlreadyInitialized)
            }
        }
    }

    /// Drops the collection as one backend call. On failure the state stays
    /// `Active` and the error is returned.
    pub async fn reset(&self) -> Result<ResetStatus> {
        let mut state = self.state.write().await;
        match *state {
            CollectionState::Uninitialized => Err(PipelineError::NotConnected(self.name.clone())),
            CollectionState::Absent => {
                info!(collection = %self.name, "no collection to reset");
                Ok(ResetStatus::NothingToReset)
            }
            CollectionState::Active { .. } => {
                self.backend
                    .drop_collection(&self.name)
                    .await
                    .map_err(|error| PipelineError::store("reset", &self.name, error))?;
                *state = CollectionState::Absent;
                info!(collection = %self.name, "collection dropped");
                Ok(ResetStatus::Dropped)
            }
        }
    }

    fn require_active(&self, state: CollectionState) -> Result<usize> {
        match state {
            CollectionState::Active { dimension } => Ok(dimension),
            CollectionState::Absent => Err(PipelineError::CollectionNotFound(self.name.clone())),
            CollectionState::Uninitialized => {
                Err(PipelineError::NotConnected(self.name.clone()))
            }
        }
    }

    /// Appends records. All vectors are checked against the collection
    /// dimension before anything is written.
    pub async fn upsert(&self, records: &[IndexedRecord]) -> Result<usize> {
        let state = self.state.read().await;
        let dimension = self.require_active(*state)?;

        if let Some(record) = records
            .iter()
            .find(|record| record.vector.dimension() != dimension)
        {
            return Err(PipelineError::DimensionMismatch {
                collection: self.name.clone(),
                expected: dimension,
                actual: record.vector.dimension(),
            });
        }

        if records.is_empty() {
            return Ok(0);
        }

        self.backend
            .insert(&self.name, records)
            .await
            .map_err(|error| PipelineError::store("upsert", &self.name, error))?;
        Ok(records.len())
    }

    pub async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.state.read().await;
        let dimension = self.require_active(*state)?;

        if query_vector.len() != dimension {
            return Err(PipelineError::DimensionMismatch {
                collection: self.name.clone(),
                expected: dimension,
                actual: query_vector.len(),
            });
        }
        if top_k == 0 {
            return Err(PipelineError::InvalidArgument(
                "top_k must be positive".to_string(),
            ));
        }

        let mut hits = self
            .backend
            .similarity_search(&self.name, query_vector, top_k)
            .await
            .map_err(|error| PipelineError::store("search", &self.name, error))?;

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Live records; an absent collection counts as empty.
    pub async fn count(&self) -> Result<u64> {
        let state = self.state.read().await;
        match *state {
            CollectionState::Uninitialized => Err(PipelineError::NotConnected(self.name.clone())),
            CollectionState::Absent => Ok(0),
            CollectionState::Active { .. } => self
                .backend
                .count(&self.name)
                .await
                .map_err(|error| PipelineError::store("count", &self.name, error)),
        }
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<u64> {
        let state = self.state.read().await;
        match *state {
            CollectionState::Uninitialized => Err(PipelineError::NotConnected(self.name.clone())),
            CollectionState::Absent => Ok(0),
            CollectionState::Active { .. } => {
                let removed = self
                    .backend
                    .delete_by_document(&self.name, document_id)
                    .await
                    .map_err(|error| PipelineError::store("delete", &self.name, error))?;
                info!(collection = %self.name, document_id, removed, "deleted document records");
                Ok(removed)
            }
        }
    }

    /// Removes every record parsed from `file_name`, across all its pages.
    pub async fn delete_file(&self, file_name: &str) -> Result<u64> {
        let state = self.state.read().await;
        match *state {
            CollectionState::Uninitialized => Err(PipelineError::NotConnected(self.name.clone())),
            CollectionState::Absent => Ok(0),
            CollectionState::Active { .. } => {
                let removed = self
                    .backend
                    .delete_by_file_name(&self.name, file_name)
                    .await
                    .map_err(|error| PipelineError::store("delete", &self.name, error))?;
                info!(collection = %self.name, file_name, removed, "deleted file records");
                Ok(removed)
            }
        }
    }
}
