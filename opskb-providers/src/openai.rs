//! OpenAI embeddings
//!
//! Also works against OpenAI-compatible `/embeddings` endpoints (Azure
//! proxies, vLLM, Ollama's OpenAI shim).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::{bearer_headers, classify_status, env_api_key, transport_error};
use crate::{EmbeddingProvider, HttpConfig, ProviderError, Result};

/// OpenAI embeddings client
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbeddings {
    /// Create from API key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, "https://api.openai.com/v1")
    }

    /// Create from the `OPENAI_API_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        Self::new(env_api_key("OPENAI_API_KEY")?)
    }

    /// Create with custom base URL (for compatible APIs)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = HttpConfig::default().build_client()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
        })
    }

    /// Set the embedding model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request shortened vectors (text-embedding-3 models only)
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Model name sent with each request
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Vectors in input order, whatever order the server listed them in
fn into_ordered(mut response: EmbeddingResponse, expected: usize) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    if response.data.len() != expected {
        return Err(ProviderError::Unavailable(format!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
            dimensions: self.dimensions,
        };
        let headers = bearer_headers(&self.api_key).map_err(|e| ProviderError::Rejected(e.to_string()))?;

        debug!(model = %self.model, inputs = texts.len(), "Requesting embeddings");
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("Failed to parse embedding response: {}", e)))?;

        into_ordered(body, texts.len())
    }
}
