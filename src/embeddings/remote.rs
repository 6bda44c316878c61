//! Remote embedding service for OpenAI-compatible `/embeddings` endpoints
//!
//! One request per text, no retry: callers above the gateway decide whether a
//! failure degrades (classifier) or propagates (ranking, digest).

use crate::config::EmbeddingConfig;
use crate::embeddings::{validate_embedding, EmbeddingGateway};
use crate::error::{ImpMailError, Result};
use crate::utils::string::truncate_chars;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request timeout duration
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Remote embedding gateway
pub struct RemoteEmbeddingService {
    client: Client,
    config: EmbeddingConfig,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
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
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl RemoteEmbeddingService {
    /// Create a new remote embedding service
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ImpMailError::NotConfigured(
                "embedding API key is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, config })
    }

    async fn call_api(&self, text: &str) -> Result<Vec<f32>> {
        debug!(
            "Calling embeddings API: model={}, chars={}",
            self.config.model,
            text.chars().count()
        );

        let request = EmbeddingRequest {
            input: vec![text],
            model: &self.config.model,
            dimensions: (self.config.dimensions > 0).then_some(self.config.dimensions),
        };

        let response = self
            .client
            .post(format!(
                "{}/embeddings",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response.json::<EmbeddingResponse>().await?;
                body.data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| ImpMailError::Embedding("Empty response from API".to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ImpMailError::Embedding(
                "Invalid or missing API key".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => Err(ImpMailError::Embedding(
                "Embedding rate limit exceeded".to_string(),
            )),
            StatusCode::BAD_REQUEST => {
                let message = match response.json::<ErrorResponse>().await {
                    Ok(ErrorResponse {
                        error: Some(detail),
                    }) => detail.message,
                    _ => "Bad request".to_string(),
                };
                Err(ImpMailError::Embedding(message))
            }
            _ => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(ImpMailError::Embedding(format!(
                    "API error (status {}): {}",
                    status, error_text
                )))
            }
        }
    }
}

#[async_trait]
impl EmbeddingGateway for RemoteEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_chars(text, self.config.max_input_chars);
        if text.trim().is_empty() {
            return Err(ImpMailError::InvalidInput(
                "Text cannot be empty".to_string(),
            ));
        }

        let embedding = self.call_api(text).await?;
        validate_embedding(&embedding, self.config.dimensions)?;
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_not_configured() {
        let config = EmbeddingConfig {
            api_key: String::new(),
            ..EmbeddingConfig::default()
        };
        let err = RemoteEmbeddingService::new(config).err().unwrap();
        assert!(err.is_not_configured());
    }

    #[test]
    fn test_request_serialization() {
        let request = EmbeddingRequest {
            input: vec!["hello"],
            model: "text-embedding-3-small",
            dimensions: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["input"][0], "hello");
        assert!(json.get("dimensions").is_none());
    }

    #[tokio::test]
    async fn test_empty_text_rejected_before_network() {
        let config = EmbeddingConfig {
            api_key: "test-key".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            ..EmbeddingConfig::default()
        };
        let service = RemoteEmbeddingService::new(config).unwrap();
        let err = service.embed("   ").await.unwrap_err();
        assert!(matches!(err, ImpMailError::InvalidInput(_)));
    }
}
