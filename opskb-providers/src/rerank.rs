//! HTTP cross-encoder client
//!
//! Speaks the `/rerank` shape shared by Cohere, Jina and text-embeddings-
//! inference style servers: `{query, documents}` in,
//! `{results: [{index, relevance_score}]}` out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::{bearer_headers, classify_status, transport_error};
use crate::{CrossEncoder, HttpConfig, ProviderError, Result};

/// Cross-encoder behind an HTTP rerank endpoint
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl HttpCrossEncoder {
    /// Create a client for `endpoint` (the full `/rerank` URL)
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: HttpConfig::default().build_client()?,
            api_key: String::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        })
    }

    /// Send a bearer token with each request
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// One score per passage in passage order; gaps or strays are an error
fn scores_in_order(response: RerankResponse, passages: usize) -> std::result::Result<Vec<f32>, ProviderError> {
    let mut scores: Vec<Option<f32>> = vec![None; passages];
    for result in response.results {
        match scores.get_mut(result.index) {
            Some(slot) => *slot = Some(result.relevance_score),
            None => {
                return Err(ProviderError::Unavailable(format!(
                    "rerank result index {} out of range",
                    result.index
                )))
            }
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| ProviderError::Unavailable(format!("no score for passage {}", i))))
        .collect()
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, passages: &[String]) -> std::result::Result<Vec<f32>, ProviderError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: &self.model,
            query,
            documents: passages,
            top_n: passages.len(),
        };
        let headers = bearer_headers(&self.api_key).map_err(|e| ProviderError::Rejected(e.to_string()))?;

        debug!(model = %self.model, passages = passages.len(), "Requesting rerank scores");
        let response = self
            .client
            .post(&self.endpoint)
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

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("Failed to parse rerank response: {}", e)))?;

        scores_in_order(body, passages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> RerankResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_scores_follow_passage_order() {
        let body = parse(
            r#"{"results":[{"index":2,"relevance_score":0.9},{"index":0,"relevance_score":0.1},{"index":1,"relevance_score":0.5}]}"#,
        );
        assert_eq!(scores_in_order(body, 3).unwrap(), vec![0.1, 0.5, 0.9]);
    }

    #[test]
    fn test_missing_or_stray_scores_fail() {
        let missing = parse(r#"{"results":[{"index":0,"relevance_score":0.1}]}"#);
        assert!(scores_in_order(missing, 2).is_err());

        let stray = parse(r#"{"results":[{"index":5,"relevance_score":0.1}]}"#);
        assert!(scores_in_order(stray, 2).is_err());
    }
}
