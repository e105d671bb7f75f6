use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, KnowledgeResult};

/// Maps text to a fixed-length vector. Implementations must be deterministic
/// for identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> KnowledgeResult<Vec<f32>>;

    /// Identifier recorded alongside persisted vectors.
    fn model_id(&self) -> &str;
}

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "nomic-embed-text".to_string(),
        )
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("failed to send embedding request: {e}")))?;

        if !response.status().is_success() {
            return Err(KnowledgeError::Embedding(format!(
                "embedding request failed: {}",
                response.status()
            )));
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("failed to parse embedding response: {e}")))?;

        if embedding_response.embedding.is_empty() {
            return Err(KnowledgeError::Embedding("embedding response was empty".to_string()));
        }

        Ok(embedding_response.embedding)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
