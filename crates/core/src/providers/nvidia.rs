use super::{embed_in_batches, http_client, send_json, BatchSettings, ChatMessage, ChatResponse, EmbeddingResponse};
use crate::embeddings::{prepare_input, BatchEmbedError, EmbeddingProvider};
use crate::error::ProviderError;
use crate::generation::{build_prompt, system_prompt, AnswerGenerator, SamplingParams};
use crate::models::{EmbeddingVector, ScoredChunk};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;

const PROVIDER: &str = "nvidia";

fn api_url(base: &str, path: &str) -> Result<Url, ProviderError> {
    Url::parse(&format!("{}/{}", base.trim_end_matches('/'), path))
        .map_err(|error| ProviderError::Config(format!("invalid NVIDIA endpoint {base}: {error}")))
}

/// Client for NVIDIA API catalog embedding models (OpenAI-compatible wire format).
pub struct NvidiaEmbedder {
    client: Client,
    url: Url,
    api_key: String,
    model: String,
    settings: BatchSettings,
}

#[derive(Serialize)]
struct NvidiaEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    input_type: &'static str,
    encoding_format: &'static str,
    truncate: &'static str,
}

impl NvidiaEmbedder {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        model: &str,
        settings: BatchSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            url: api_url(endpoint, "embeddings")?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            settings,
        })
    }

    async fn request(
        &self,
        inputs: Vec<String>,
        input_type: &'static str,
    ) -> Result<Vec<EmbeddingVector>, ProviderError> {
        let body = NvidiaEmbeddingRequest {
            model: &self.model,
            input: &inputs,
            input_type,
            encoding_format: "float",
            truncate: "END",
        };
        let request = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&body);

        let response: EmbeddingResponse = send_json(PROVIDER, request).await?;
        response.into_vectors(PROVIDER, inputs.len())
    }
}

#[async_trait]
impl EmbeddingProvider for NvidiaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        let input = prepare_input(text, self.settings.max_input_tokens)?;
        let mut vectors = self.request(vec![input], "query").await?;
        vectors.pop().ok_or(ProviderError::InvalidResponse {
            provider: PROVIDER,
            details: "no embedding returned".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, BatchEmbedError> {
        embed_in_batches(texts, self.settings, |inputs| self.request(inputs, "passage")).await
    }
}

/// Chat completions against NVIDIA hosted LLMs.
pub struct NvidiaChatGenerator {
    client: Client,
    url: Url,
    api_key: String,
    model: String,
    sampling: SamplingParams,
}

#[derive(Serialize)]
struct NvidiaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

impl NvidiaChatGenerator {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        model: &str,
        sampling: SamplingParams,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            url: api_url(endpoint, "chat/completions")?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            sampling,
        })
    }
}

#[async_trait]
impl AnswerGenerator for NvidiaChatGenerator {
    async fn synthesize(&self, query: &str, context: &[ScoredChunk]) -> Result<String, ProviderError> {
        let prompt = build_prompt(query, context);
        let body = NvidiaChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            max_tokens: self.sampling.max_tokens,
            stream: false,
        };
        let request = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&body);

        let response: ChatResponse = send_json(PROVIDER, request).await?;
        response.into_answer(PROVIDER)
    }
}
