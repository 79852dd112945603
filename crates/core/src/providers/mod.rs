//! HTTP embedding and chat-completion providers, chosen once from configuration.

mod azure;
mod nvidia;

pub use azure::{AzureChatGenerator, AzureOpenAiEmbedder};
pub use nvidia::{NvidiaChatGenerator, NvidiaEmbedder};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind, GenerationConfig, GeneratorKind, NVIDIA_API_BASE};
use crate::embeddings::{prepare_input, BatchEmbedError, CharacterNgramEmbedder, EmbeddingProvider, ModelDimensions};
use crate::error::{PipelineError, ProviderError};
use crate::generation::{AnswerGenerator, ExtractiveGenerator};
use crate::models::EmbeddingVector;
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub fn build_embedder(
    config: &EmbeddingConfig,
    dimensions: &ModelDimensions,
) -> Result<Arc<dyn EmbeddingProvider>, PipelineError> {
    match config.provider {
        EmbeddingProviderKind::Local => Ok(Arc::new(CharacterNgramEmbedder {
            dimensions: dimensions.dimension_for(&config.model_name)?,
            max_input_tokens: config.max_input_tokens,
        })),
        EmbeddingProviderKind::Nvidia => Ok(Arc::new(NvidiaEmbedder::new(
            config.endpoint.as_deref().unwrap_or(NVIDIA_API_BASE),
            required_key(config.api_key.as_deref(), "embedding")?,
            &config.model_name,
            BatchSettings::from(config),
            config.timeout(),
        )?)),
        EmbeddingProviderKind::Azure => Ok(Arc::new(AzureOpenAiEmbedder::new(
            required_endpoint(config.endpoint.as_deref(), "embedding")?,
            required_key(config.api_key.as_deref(), "embedding")?,
            &config.model_name,
            &config.api_version,
            BatchSettings::from(config),
            config.timeout(),
        )?)),
    }
}

pub fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>, PipelineError> {
    match config.provider {
        GeneratorKind::Extractive => Ok(Arc::new(ExtractiveGenerator)),
        GeneratorKind::Nvidia => Ok(Arc::new(NvidiaChatGenerator::new(
            config.endpoint.as_deref().unwrap_or(NVIDIA_API_BASE),
            required_key(config.api_key.as_deref(), "generation")?,
            &config.model_name,
            config.sampling(),
            config.timeout(),
        )?)),
        GeneratorKind::Azure => Ok(Arc::new(AzureChatGenerator::new(
            required_endpoint(config.endpoint.as_deref(), "generation")?,
            required_key(config.api_key.as_deref(), "generation")?,
            &config.model_name,
            &config.api_version,
            config.sampling(),
            config.timeout(),
        )?)),
    }
}

fn required_key<'a>(value: Option<&'a str>, section: &str) -> Result<&'a str, PipelineError> {
    value
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| PipelineError::Config(format!("{section}.api_key is required for this provider")))
}

fn required_endpoint<'a>(value: Option<&'a str>, section: &str) -> Result<&'a str, PipelineError> {
    value
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
        .ok_or_else(|| PipelineError::Config(format!("{section}.endpoint is required for this provider")))
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub max_input_tokens: usize,
}

impl From<&EmbeddingConfig> for BatchSettings {
    fn from(value: &EmbeddingConfig) -> Self {
        Self {
            batch_size: value.batch_size.max(1),
            max_concurrency: value.max_concurrency.max(1),
            max_input_tokens: value.max_input_tokens.max(1),
        }
    }
}

pub(crate) fn http_client(provider: &'static str, timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| ProviderError::from_reqwest(provider, error))
}

pub(crate) async fn send_json<R: DeserializeOwned>(
    provider: &'static str,
    request: RequestBuilder,
) -> Result<R, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|error| ProviderError::from_reqwest(provider, error))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(ProviderError::Status {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|error| ProviderError::InvalidResponse {
            provider,
            details: error.to_string(),
        })
}

#[derive(Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    pub embedding: Vec<f32>,
    pub index: usize,
}

impl EmbeddingResponse {
    /// Vectors in request order, checking one came back per input.
    pub fn into_vectors(
        mut self,
        provider: &'static str,
        expected: usize,
    ) -> Result<Vec<EmbeddingVector>, ProviderError> {
        self.data.sort_by_key(|entry| entry.index);
        if self.data.len() != expected {
            return Err(ProviderError::InvalidResponse {
                provider,
                details: format!("{} embeddings returned for {} inputs", self.data.len(), expected),
            });
        }
        Ok(self
            .data
            .into_iter()
            .map(|entry| EmbeddingVector::new(entry.embedding))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    pub fn into_answer(self, provider: &'static str) -> Result<String, ProviderError> {
        self.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider,
                details: "response had no message content".to_string(),
            })
    }
}

/// Prepares every input, then sends them in requests of at most
/// `batch_size` texts with at most `max_concurrency` requests in flight.
/// A failed request marks every item it carried as failed.
pub(crate) async fn embed_in_batches<F, Fut>(
    texts: &[String],
    settings: BatchSettings,
    send: F,
) -> Result<Vec<EmbeddingVector>, BatchEmbedError>
where
    F: Fn(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<EmbeddingVector>, ProviderError>>,
{
    let mut slots: Vec<Option<Result<EmbeddingVector, ProviderError>>> =
        (0..texts.len()).map(|_| None).collect();
    let mut pending: Vec<(usize, String)> = Vec::with_capacity(texts.len());

    for (index, text) in texts.iter().enumerate() {
        match prepare_input(text, settings.max_input_tokens) {
            Ok(prepared) => pending.push((index, prepared)),
            Err(error) => slots[index] = Some(Err(error)),
        }
    }

    let batches: Vec<(Vec<usize>, Vec<String>)> = pending
        .chunks(settings.batch_size.max(1))
        .map(|batch| batch.iter().cloned().unzip())
        .collect();

    let responses = stream::iter(batches)
        .map(|(indices, inputs)| {
            let request = send(inputs);
            async move { (indices, request.await) }
        })
        .buffered(settings.max_concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    for (indices, response) in responses {
        match response {
            Ok(vectors) => {
                for (index, vector) in indices.into_iter().zip(vectors) {
                    slots[index] = Some(Ok(vector));
                }
            }
            Err(error) => {
                let reason = error.to_string();
                let mut indices = indices.into_iter();
                if let Some(first) = indices.next() {
                    slots[first] = Some(Err(error));
                }
                for index in indices {
                    slots[index] = Some(Err(ProviderError::Request(format!(
                        "batch request failed: {reason}"
                    ))));
                }
            }
        }
    }

    let results = slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(ProviderError::Request("no embedding returned".to_string()))
            })
        })
        .collect();

    crate::embeddings::collect_batch(results)
}
