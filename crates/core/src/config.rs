use crate::chunking::ChunkingConfig;
use crate::embeddings::{ModelDimensions, DEFAULT_MAX_INPUT_TOKENS, LOCAL_NGRAM_MODEL};
use crate::error::PipelineError;
use crate::generation::SamplingParams;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "RAG_";
pub const NVIDIA_API_BASE: &str = "https://integrate.api.nvidia.com/v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Nvidia,
    Azure,
    Local,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    Nvidia,
    Azure,
    Extractive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model_name: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub api_version: String,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub max_input_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Local,
            model_name: LOCAL_NGRAM_MODEL.to_string(),
            api_key: None,
            endpoint: None,
            api_version: "2024-02-01".to_string(),
            batch_size: 32,
            max_concurrency: 4,
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            timeout_secs: 60,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: GeneratorKind,
    pub model_name: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub api_version: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let sampling = SamplingParams::default();
        Self {
            provider: GeneratorKind::Extractive,
            model_name: "mistralai/mistral-7b-instruct-v0.2".to_string(),
            api_key: None,
            endpoint: None,
            api_version: "2024-07-01-preview".to_string(),
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            max_tokens: sampling.max_tokens,
            timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub backend: BackendKind,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Qdrant,
            endpoint: "http://localhost:6333".to_string(),
            timeout_secs: 30,
        }
    }
}

impl VectorStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub collection_name: String,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub model_dimensions: ModelDimensions,
    pub vector_store: VectorStoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            collection_name: "documents".to_string(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            model_dimensions: ModelDimensions::default(),
            vector_store: VectorStoreConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the TOML file when given, then `RAG_` environment
    /// variables (`__` separates nested keys, e.g. `RAG_EMBEDDING__API_KEY`).
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_toml_str(source: &str) -> Result<Self, PipelineError> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::string(source)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, PipelineError> {
        let config: Self = figment
            .extract()
            .map_err(|error| PipelineError::Config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.collection_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "collection_name must not be empty".to_string(),
            ));
        }
        self.chunking.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(PipelineError::Config(
                "retrieval.top_k must be positive".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 || self.embedding.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "embedding.batch_size and embedding.max_concurrency must be positive".to_string(),
            ));
        }
        if self.embedding.max_input_tokens == 0 {
            return Err(PipelineError::Config(
                "embedding.max_input_tokens must be positive".to_string(),
            ));
        }
        if self.vector_store.timeout_secs == 0 {
            return Err(PipelineError::Config(
                "vector_store.timeout_secs must be positive".to_string(),
            ));
        }
        self.model_dimensions.validate()?;
        self.embedding_dimension().map(|_| ())
    }

    /// Output dimension of the configured embedding model.
    pub fn embedding_dimension(&self) -> Result<usize, PipelineError> {
        self.model_dimensions
            .dimension_for(&self.embedding.model_name)
    }
}
