use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::MnemaError;

/// Text-to-vector contract. Implementations must be deterministic for a
/// given input so the duplicate and conflict thresholds behave stably.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MnemaError>;
}

/// Remote embedding backend speaking the Ollama `/api/embeddings` contract:
/// `POST {base}/api/embeddings {"model", "prompt"}` → `{"embedding": [...]}`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MnemaError> {
        let body = serde_json::json!({ "model": self.model, "prompt": text });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| MnemaError::Embedding(err.to_string()))?
            .error_for_status()
            .map_err(|err| MnemaError::Embedding(err.to_string()))?;

        let json: Value = response
            .json()
            .await
            .map_err(|err| MnemaError::Embedding(err.to_string()))?;

        let embedding: Vec<f32> = json["embedding"]
            .as_array()
            .ok_or_else(|| MnemaError::Embedding("response missing 'embedding' array".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if embedding.is_empty() {
            return Err(MnemaError::Embedding("empty embedding returned".to_string()));
        }
        debug!(dims = embedding.len(), "embedded text");
        Ok(embedding)
    }
}
