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

const PROVIDER: &str = "azure-openai";

/// `{endpoint}/openai/deployments/{deployment}/{operation}?api-version={version}`
fn deployment_url(
    endpoint: &str,
    deployment: &str,
    operation: &str,
    api_version: &str,
) -> Result<Url, ProviderError> {
    let mut url = Url::parse(&format!(
        "{}/openai/deployments/{}/{}",
        endpoint.trim_end_matches('/'),
        deployment,
        operation
    ))
    .map_err(|error| ProviderError::Config(format!("invalid Azure endpoint {endpoint}: {error}")))?;
    url.query_pairs_mut().append_pair("api-version", api_version);
    Ok(url)
}

/// Azure OpenAI embeddings; the model name doubles as the deployment name.
pub struct AzureOpenAiEmbedder {
    client: Client,
    url: Url,
    api_key: String,
    model: String,
    settings: BatchSettings,
}

#[derive(Serialize)]
struct AzureEmbeddingRequest<'a> {
    input: &'a [String],
}

impl AzureOpenAiEmbedder {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        model: &str,
        api_version: &str,
        settings: BatchSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            url: deployment_url(endpoint, model, "embeddings", api_version)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            settings,
        })
    }

    async fn request(&self, inputs: Vec<String>) -> Result<Vec<EmbeddingVector>, ProviderError> {
        let request = self
            .client
            .post(self.url.clone())
            .header("api-key", &self.api_key)
            .json(&AzureEmbeddingRequest { input: &inputs });

        let response: EmbeddingResponse = send_json(PROVIDER, request).await?;
        response.into_vectors(PROVIDER, inputs.len())
    }
}

#[async_trait]
impl EmbeddingProvider for AzureOpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        let input = prepare_input(text, self.settings.max_input_tokens)?;
        let mut vectors = self.request(vec![input]).await?;
        vectors.pop().ok_or(ProviderError::InvalidResponse {
            provider: PROVIDER,
            details: "no embedding returned".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, BatchEmbedError> {
        embed_in_batches(texts, self.settings, |inputs| self.request(inputs)).await
    }
}

pub struct AzureChatGenerator {
    client: Client,
    url: Url,
    api_key: String,
    sampling: SamplingParams,
}

#[derive(Serialize)]
struct AzureChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

impl AzureChatGenerator {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        deployment: &str,
        api_version: &str,
        sampling: SamplingParams,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            url: deployment_url(endpoint, deployment, "chat/completions", api_version)?,
            api_key: api_key.to_string(),
            sampling,
        })
    }
}

#[async_trait]
impl AnswerGenerator for AzureChatGenerator {
    async fn synthesize(&self, query: &str, context: &[ScoredChunk]) -> Result<String, ProviderError> {
        let prompt = build_prompt(query, context);
        let body = AzureChatRequest {
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
        };
        let request = self
            .client
            .post(self.url.clone())
            .header("api-key", &self.api_key)
            .json(&body);

        let response: ChatResponse = send_json(PROVIDER, request).await?;
        response.into_answer(PROVIDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_url_carries_api_version() {
        let url = deployment_url(
            "https://example.openai.azure.com/",
            "text-embedding-ada-002",
            "embeddings",
            "2024-02-01",
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "https://example.openai.azure.com/openai/deployments/text-embedding-ada-002/embeddings?api-version=2024-02-01"
        );
    }

    #[test]
    fn malformed_endpoint_is_a_config_error() {
        let result = deployment_url("example.openai.azure.com", "gpt", "chat/completions", "v");
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }
}
