use std::time::{Duration, Instant};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{SearchError, SearchResult};
use crate::retry::RetryPolicy;

/// Vector length used when a local model is not in the table below
pub const DEFAULT_LOCAL_DIMENSION: usize = 768;
/// Vector length used when a cloud model is not in the table below
pub const DEFAULT_CLOUD_DIMENSION: usize = 1024;

/// Documented output lengths of common embedding models
const KNOWN_DIMENSIONS: &[(&str, usize)] = &[
    ("nomic-embed-text", 768),
    ("mxbai-embed-large", 1024),
    ("all-minilm", 384),
    ("bge-m3", 1024),
    ("bge-large", 1024),
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
];

/// Look up a model's documented dimension, ignoring tags like `:latest`
/// and vendor prefixes like `BAAI/`
pub fn known_dimension(model: &str) -> Option<usize> {
    let name = model.rsplit('/').next().unwrap_or(model);
    let name = name.split(':').next().unwrap_or(name).to_lowercase();
    KNOWN_DIMENSIONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, dimension)| *dimension)
}

/// Which embedding service to call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EmbeddingBackendConfig {
    /// Local Ollama server
    Ollama { host: String, model: String },
    /// OpenAI-compatible embeddings endpoint with bearer authentication
    Cloud {
        api_url: String,
        api_key: String,
        model: String,
    },
}

impl Default for EmbeddingBackendConfig {
    fn default() -> Self {
        EmbeddingBackendConfig::Ollama {
            host: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

fn check_url(field: &str, value: &str) -> SearchResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SearchError::config(format!("{} is required", field)));
    }
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(SearchError::config(format!(
            "{} must start with http:// or https://, got '{}'",
            field, value
        )));
    }
    Ok(())
}

fn check_present(field: &str, value: &str) -> SearchResult<()> {
    if value.trim().is_empty() {
        return Err(SearchError::config(format!("{} is required", field)));
    }
    Ok(())
}

impl EmbeddingBackendConfig {
    pub fn validate(&self) -> SearchResult<()> {
        match self {
            EmbeddingBackendConfig::Ollama { host, model } => {
                check_url("Ollama host", host)?;
                check_present("embedding model", model)
            }
            EmbeddingBackendConfig::Cloud { api_url, api_key, model } => {
                check_url("embedding API URL", api_url)?;
                check_present("embedding API key", api_key)?;
                check_present("embedding model", model)
            }
        }
    }

    pub fn model(&self) -> &str {
        match self {
            EmbeddingBackendConfig::Ollama { model, .. } | EmbeddingBackendConfig::Cloud { model, .. } => model,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            EmbeddingBackendConfig::Ollama { .. } => "ollama",
            EmbeddingBackendConfig::Cloud { .. } => "cloud",
        }
    }

    /// Vector length this backend produces
    pub fn dimension(&self, dimension_override: Option<usize>) -> usize {
        if let Some(dimension) = dimension_override {
            return dimension;
        }
        known_dimension(self.model()).unwrap_or(match self {
            EmbeddingBackendConfig::Ollama { .. } => DEFAULT_LOCAL_DIMENSION,
            EmbeddingBackendConfig::Cloud { .. } => DEFAULT_CLOUD_DIMENSION,
        })
    }
}

/// Text to vector capability
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>>;

    /// Expected vector length
    fn dimension(&self) -> usize;

    fn backend_name(&self) -> &str;
}

/// Request payload for Ollama embedding API
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Response from Ollama embedding API
#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Request payload for OpenAI-compatible embedding APIs
#[derive(Debug, Serialize)]
struct CloudEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CloudEmbeddingResponse {
    #[serde(default)]
    data: Vec<CloudEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct CloudEmbeddingData {
    embedding: Vec<f32>,
}

/// HTTP embedding client for the configured backend
pub struct EmbeddingGenerator {
    client: Client,
    backend: EmbeddingBackendConfig,
    dimension_override: Option<usize>,
    retry_policy: RetryPolicy,
}

impl EmbeddingGenerator {
    pub fn new(backend: EmbeddingBackendConfig) -> SearchResult<Self> {
        Self::with_options(backend, None, Duration::from_secs(30), RetryPolicy::default())
    }

    pub fn with_options(
        backend: EmbeddingBackendConfig,
        dimension_override: Option<usize>,
        timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> SearchResult<Self> {
        backend.validate()?;

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| SearchError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            backend,
            dimension_override,
            retry_policy,
        })
    }

    pub fn backend(&self) -> &EmbeddingBackendConfig {
        &self.backend
    }

    /// One request, no retries
    pub async fn generate_embedding(&self, text: &str) -> SearchResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(SearchError::InvalidInput {
                reason: "cannot embed empty text".to_string(),
            });
        }

        let start_time = Instant::now();
        let embedding = match &self.backend {
            EmbeddingBackendConfig::Ollama { host, model } => self.request_ollama(host, model, text).await?,
            EmbeddingBackendConfig::Cloud { api_url, api_key, model } => {
                self.request_cloud(api_url, api_key, model, text).await?
            }
        };

        if embedding.is_empty() {
            return Err(SearchError::InvalidResponse {
                service: "embedding".to_string(),
                reason: "Empty embedding vector returned".to_string(),
            });
        }

        log::debug!(
            "✅ Generated {}-dim embedding for {} characters in {:?}",
            embedding.len(),
            text.len(),
            start_time.elapsed()
        );
        Ok(embedding)
    }

    /// Retry transient failures up to `max_retries` times with exponential backoff
    pub async fn generate_embedding_with_retry(&self, text: &str, max_retries: usize) -> SearchResult<Vec<f32>> {
        self.retry_policy
            .clone()
            .with_max_retries(max_retries)
            .run("embedding", || self.generate_embedding(text))
            .await
    }

    async fn request_ollama(&self, host: &str, model: &str, text: &str) -> SearchResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbeddingRequest { model, prompt: text })
            .send()
            .await?;

        let body: OllamaEmbeddingResponse = Self::parse_response(response).await?;
        Ok(body.embedding)
    }

    async fn request_cloud(&self, api_url: &str, api_key: &str, model: &str, text: &str) -> SearchResult<Vec<f32>> {
        let response = self
            .client
            .post(api_url)
            .bearer_auth(api_key)
            .json(&CloudEmbeddingRequest {
                model,
                input: text,
                dimensions: self.dimension_override,
            })
            .send()
            .await?;

        let body: CloudEmbeddingResponse = Self::parse_response(response).await?;
        Ok(body
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .unwrap_or_default())
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> SearchResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Http {
                status_code: status.as_u16(),
                message,
            });
        }

        response.json::<T>().await.map_err(|e| SearchError::InvalidResponse {
            service: "embedding".to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingGenerator {
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        self.generate_embedding_with_retry(text, self.retry_policy.max_retries).await
    }

    fn dimension(&self) -> usize {
        self.backend.dimension(self.dimension_override)
    }

    fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }
}
