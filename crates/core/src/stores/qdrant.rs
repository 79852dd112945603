use crate::models::{IndexedRecord, ScoredChunk};
use crate::traits::{CreateOutcome, VectorBackend};
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantBackend {
    endpoint: String,
    client: Client,
}

impl QdrantBackend {
    /// Every request, including connection setup, is bounded by `timeout`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.endpoint, name)
    }

    fn match_filter(key: &str, value: &str) -> Value {
        json!({
            "must": [
                { "key": key, "match": { "value": value } }
            ]
        })
    }

    async fn expect_success(response: Response) -> Result<Value, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {body}"),
            });
        }
        Ok(response.json().await?)
    }

    async fn count_matching(&self, name: &str, filter: Option<Value>) -> Result<u64, StoreError> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url(name)))
            .json(&body)
            .send()
            .await?;

        let parsed = Self::expect_success(response).await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response has no result.count".to_string(),
            })
    }

    async fn delete_matching(&self, name: &str, filter: Value) -> Result<u64, StoreError> {
        let matching = self.count_matching(name, Some(filter.clone())).await?;
        if matching == 0 {
            return Ok(0);
        }

        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url(name)))
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        Self::expect_success(response).await?;
        Ok(matching)
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .get(format!("{}/exists", self.collection_url(name)))
            .send()
            .await?;

        let parsed = Self::expect_success(response).await?;
        Ok(parsed
            .pointer("/result/exists")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn collection_dimension(&self, name: &str) -> Result<Option<usize>, StoreError> {
        let response = self.client.get(self.collection_url(name)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let parsed = Self::expect_success(response).await?;
        let size = parsed
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("collection {name} has no single vector size"),
            })?;
        Ok(Some(size as usize))
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<CreateOutcome, StoreError> {
        let response = self
            .client
            .put(self.collection_url(name))
            .json(&json!({
                "vectors": { "size": dimension, "distance": "Cosine" }
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(CreateOutcome::AlreadyExists);
        }
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("already exists") {
                return Ok(CreateOutcome::AlreadyExists);
            }
            return Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {body}"),
            });
        }

        Self::expect_success(response).await?;
        Ok(CreateOutcome::Created)
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        let response = self.client.delete(self.collection_url(name)).send().await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn insert(&self, name: &str, records: &[IndexedRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": Uuid::now_v7().to_string(),
                    "vector": record.vector.values,
                    "payload": {
                        "chunk_text": record.chunk_text,
                        "origin_document_id": record.origin_document_id,
                        "sequence_index": record.sequence_index,
                        "file_name": record.file_name,
                        "page_number": record.page_number,
                    },
                })
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(name)))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        Self::expect_success(response).await?;
        Ok(())
    }

    async fn similarity_search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(name)))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        let parsed = Self::expect_success(response).await?;
        Ok(parse_search_hits(&parsed))
    }

    async fn count(&self, name: &str) -> Result<u64, StoreError> {
        self.count_matching(name, None).await
    }

    async fn delete_by_document(&self, name: &str, document_id: &str) -> Result<u64, StoreError> {
        self.delete_matching(name, Self::match_filter("origin_document_id", document_id))
            .await
    }

    async fn delete_by_file_name(&self, name: &str, file_name: &str) -> Result<u64, StoreError> {
        self.delete_matching(name, Self::match_filter("file_name", file_name))
            .await
    }
}

/// Hits sorted by descending score; equal scores keep insertion order
/// through the time-ordered point ids.
fn parse_search_hits(parsed: &Value) -> Vec<ScoredChunk> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut ranked: Vec<(String, ScoredChunk)> = hits
        .iter()
        .map(|hit| {
            let id = hit
                .pointer("/id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let chunk = ScoredChunk {
                chunk_text: payload_str(hit, "chunk_text"),
                score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
                origin_document_id: payload_str(hit, "origin_document_id"),
                sequence_index: hit
                    .pointer("/payload/sequence_index")
                    .and_then(Value::as_u64)
                    .unwrap_or_default(),
                file_name: payload_str(hit, "file_name"),
                page_number: hit
                    .pointer("/payload/page_number")
                    .and_then(Value::as_u64)
                    .and_then(|page| u32::try_from(page).ok()),
            };
            (id, chunk)
        })
        .collect();

    ranked.sort_by(|(left_id, left), (right_id, right)| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left_id.cmp(right_id))
    });
    ranked.into_iter().map(|(_, chunk)| chunk).collect()
}

fn payload_str(hit: &Value, field: &str) -> String {
    hit.pointer(&format!("/payload/{field}"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
