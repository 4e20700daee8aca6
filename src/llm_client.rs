//! Text generation client.
//!
//! The pipeline treats generation as one opaque `generate(prompt) -> text`
//! call. Backend settings are checked on every request, so a plugin can start
//! with an incomplete generation setup and only fail the operations that need it.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{SearchError, SearchResult};
use crate::retry::RetryPolicy;

/// Prompt in, completion out
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> SearchResult<String>;
}

/// Which text generation service to call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GenerationBackendConfig {
    /// Local Ollama server (`/api/generate`)
    Ollama { host: String, model: String },
    /// Any chat-completions endpoint speaking the OpenAI wire format
    OpenAiCompatible {
        api_url: String,
        api_key: String,
        model: String,
    },
}

impl Default for GenerationBackendConfig {
    fn default() -> Self {
        GenerationBackendConfig::Ollama {
            host: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
        }
    }
}

impl GenerationBackendConfig {
    pub fn validate(&self) -> SearchResult<()> {
        let require = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(SearchError::config(format!("{} is required for text generation", field)))
            } else {
                Ok(())
            }
        };
        match self {
            GenerationBackendConfig::Ollama { host, model } => {
                require("Ollama host", host)?;
                require("model name", model)
            }
            GenerationBackendConfig::OpenAiCompatible { api_url, api_key, model } => {
                require("API URL", api_url)?;
                require("API key", api_key)?;
                require("model name", model)
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            GenerationBackendConfig::Ollama { .. } => "ollama",
            GenerationBackendConfig::OpenAiCompatible { .. } => "openai-compatible",
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// HTTP text generation client
pub struct LlmClient {
    client: Client,
    backend: GenerationBackendConfig,
    retry_policy: RetryPolicy,
}

impl LlmClient {
    pub fn new(backend: GenerationBackendConfig, timeout: Duration, retry_policy: RetryPolicy) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            backend,
            retry_policy,
        })
    }

    pub fn backend(&self) -> &GenerationBackendConfig {
        &self.backend
    }

    /// Whether the Ollama server answers `/api/tags`; cloud backends are assumed reachable
    pub async fn is_available(&self) -> bool {
        match &self.backend {
            GenerationBackendConfig::Ollama { host, .. } => {
                let url = format!("{}/api/tags", host.trim_end_matches('/'));
                match self.client.get(&url).timeout(Duration::from_secs(5)).send().await {
                    Ok(response) => response.status().is_success(),
                    Err(e) => {
                        log::debug!("🔌 Ollama health check failed: {}", e);
                        false
                    }
                }
            }
            GenerationBackendConfig::OpenAiCompatible { .. } => self.backend.validate().is_ok(),
        }
    }

    async fn generate_once(&self, prompt: &str) -> SearchResult<String> {
        let text = match &self.backend {
            GenerationBackendConfig::Ollama { host, model } => {
                let url = format!("{}/api/generate", host.trim_end_matches('/'));
                let response = self
                    .client
                    .post(&url)
                    .json(&OllamaGenerateRequest { model, prompt, stream: false })
                    .send()
                    .await?;
                let body: OllamaGenerateResponse = parse_response(response).await?;
                body.response
            }
            GenerationBackendConfig::OpenAiCompatible { api_url, api_key, model } => {
                let response = self
                    .client
                    .post(api_url)
                    .bearer_auth(api_key)
                    .json(&ChatRequest {
                        model,
                        messages: vec![ChatMessage { role: "user", content: prompt }],
                        stream: false,
                    })
                    .send()
                    .await?;
                let body: ChatResponse = parse_response(response).await?;
                body.choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| SearchError::InvalidResponse {
                        service: "text generation".to_string(),
                        reason: "response contained no choices".to_string(),
                    })?
            }
        };
        Ok(text.trim().to_string())
    }
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
        service: "text generation".to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> SearchResult<String> {
        self.backend.validate()?;
        log::debug!("🤖 Generating with {} ({} prompt chars)", self.backend.backend_name(), prompt.len());
        self.retry_policy
            .run("text generation", || self.generate_once(prompt))
            .await
    }
}
