// src/llm/embeddings.rs
// OpenAI embeddings provider (text-embedding-3-large, reduced dimensions)

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Embedding call failures.
///
/// `ContextLength` is detected from the provider's 400 "maximum context
/// length" error body and drives the ingestion layer's truncate-and-retry
/// safeguard.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding input exceeds the model context length")]
    ContextLength,
    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// OpenAI embeddings client.
///
/// Uses text-embedding-3-large with reduced dimensions for multilingual
/// (Hebrew + English) support; the dimensions parameter leans on OpenAI's
/// Matryoshka truncation so quality loss stays minimal.
pub struct OpenAIEmbeddings {
    client: Client,
    api_key: String,
    model: String,
    dimensions: u64,
    base_url: String,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    input: EmbeddingInput,
    model: String,
    dimensions: u64,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAIEmbeddings {
    pub fn new(api_key: String, model: String, dimensions: u64) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            dimensions,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn dimensions(&self) -> u64 {
        self.dimensions
    }

    fn api_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    async fn request(&self, input: EmbeddingInput) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = EmbeddingRequest {
            input,
            model: self.model.clone(),
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if body.contains("maximum context length") {
                return Err(EmbeddingError::ContextLength);
            }
            return Err(EmbeddingError::Api { status, body });
        }

        let result: EmbeddingResponse = response.json().await?;

        // The API may return out of order; sort by index
        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    /// Generate an embedding for a search query
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        debug!("Generating query embedding ({} chars)", text.len());
        let mut vectors = self
            .request(EmbeddingInput::Single(text.to_string()))
            .await?;
        vectors.pop().ok_or(EmbeddingError::Api {
            status: 200,
            body: "empty embedding response".to_string(),
        })
    }

    /// Generate embeddings for a batch of documents in one API call
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Generating {} document embeddings", texts.len());
        self.request(EmbeddingInput::Batch(texts.to_vec())).await
    }
}
