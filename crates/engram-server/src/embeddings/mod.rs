// crates/engram-server/src/embeddings/mod.rs
// Embedding client over an OpenAI-compatible local endpoint

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::config::EngramConfig;
use crate::utils::truncate_at_boundary;

/// Default local embedding model
const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Max characters to embed (conservative limit for local models)
const MAX_TEXT_CHARS: usize = 8192 * 4;

/// Max texts per batch request
const MAX_BATCH_SIZE: usize = 64;

/// Retry attempts
const RETRY_ATTEMPTS: usize = 1;

/// OpenAI-compatible embedding response types
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embedding client for a local sentence-embedding server
/// (OpenAI-compatible endpoint, no auth required).
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl EmbeddingClient {
    /// Create a client from configuration, or None when no endpoint is set.
    pub fn from_config(config: &EngramConfig) -> Option<Self> {
        let base_url = config.embedding_url.as_ref()?;
        let client = Self::new(
            base_url.clone(),
            config.embedding_model.clone(),
            Some(config.embedding_dimensions),
        );
        tracing::info!(
            model = client.model_name(),
            dimensions = client.dimensions(),
            "Using local embeddings"
        );
        Some(client)
    }

    pub fn new(base_url: String, model: Option<String>, dimensions: Option<usize>) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let dimensions = dimensions.unwrap_or(crate::db::DEFAULT_EMBEDDING_DIM);
        let base_url = base_url.trim_end_matches('/').to_string();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            base_url,
            model,
            dimensions,
            http_client,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a single text. The result is L2-normalized.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_texts(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    /// Embed multiple texts in batch. Results are L2-normalized.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        if texts.len() <= MAX_BATCH_SIZE {
            return self.embed_texts(texts).await;
        }

        let mut all_results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            all_results.extend(self.embed_texts(chunk).await?);
        }
        Ok(all_results)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts
            .iter()
            .map(|t| {
                if t.len() > MAX_TEXT_CHARS {
                    debug!(
                        "Truncating text from {} to {} chars for embedding",
                        t.len(),
                        MAX_TEXT_CHARS
                    );
                    truncate_at_boundary(t, MAX_TEXT_CHARS)
                } else {
                    t.as_str()
                }
            })
            .collect();

        let input_value = if inputs.len() == 1 {
            serde_json::Value::String(inputs[0].to_string())
        } else {
            serde_json::Value::Array(
                inputs
                    .iter()
                    .map(|s| serde_json::Value::String(s.to_string()))
                    .collect(),
            )
        };

        let body = serde_json::json!({
            "input": input_value,
            "model": self.model,
        });

        let url = format!("{}/v1/embeddings", self.base_url);

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }

            match self
                .http_client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        let resp: EmbeddingResponse = response
                            .json()
                            .await
                            .context("Failed to parse embedding response")?;

                        let mut data = resp.data;
                        data.sort_by_key(|d| d.index);

                        let embeddings: Vec<Vec<f32>> = data
                            .into_iter()
                            .map(|d| l2_normalize(d.embedding))
                            .collect();

                        if let Some(first) = embeddings.first()
                            && first.len() != self.dimensions
                        {
                            debug!(
                                "Embedding dimensions: expected {}, got {} - using actual",
                                self.dimensions,
                                first.len()
                            );
                        }

                        return Ok(embeddings);
                    }

                    let status = response.status();
                    let body_text = response.text().await.unwrap_or_default();
                    last_error = Some(anyhow::anyhow!(
                        "Embedding request failed ({}): {}",
                        status,
                        body_text
                    ));
                }
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Embedding request error: {}", e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Embedding failed")))
    }
}

/// Scale a vector to unit length. Zero vectors pass through unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Serialize an embedding as little-endian f32 bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize BLOB bytes back into an embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Mismatched lengths score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_and_dimensions() {
        let client = EmbeddingClient::new("http://localhost:11434".to_string(), None, None);
        assert_eq!(client.dimensions(), 768);
        assert_eq!(client.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn test_base_url_normalization() {
        let client = EmbeddingClient::new("http://localhost:11434/".to_string(), None, None);
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        let bytes = embedding_to_bytes(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes), v);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let v = l2_normalize(vec![0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = [1.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        let d = [-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
