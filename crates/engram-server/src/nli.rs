// nli.rs
// Optional zero-shot entailment scorer over a local HTTP endpoint.
// When absent, the contradiction engine runs on lexical screens alone.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::EngramConfig;

/// Scores for one premise/hypothesis pair.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EntailmentScores {
    pub entailment: f64,
    pub contradiction: f64,
    pub neutral: f64,
}

pub struct NliClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl NliClient {
    pub fn from_config(config: &EngramConfig) -> Option<Self> {
        let base_url = config.nli_url.as_ref()?;
        tracing::info!(url = %base_url, "Using NLI entailment scoring");
        Some(Self::new(base_url.clone()))
    }

    pub fn new(base_url: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// P(entailment | premise, hypothesis) triple from the local model.
    pub async fn score(&self, premise: &str, hypothesis: &str) -> Result<EntailmentScores> {
        let url = format!("{}/v1/entailment", self.base_url);
        let body = serde_json::json!({
            "premise": premise,
            "hypothesis": hypothesis,
        });

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("NLI request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("NLI request failed ({})", status);
        }

        response
            .json::<EntailmentScores>()
            .await
            .context("Failed to parse NLI response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        let client = NliClient::new("http://localhost:9090/".to_string());
        assert_eq!(client.base_url, "http://localhost:9090");
    }

    #[test]
    fn test_scores_deserialize() {
        let json = r#"{"entailment": 0.1, "contradiction": 0.85, "neutral": 0.05}"#;
        let scores: EntailmentScores = serde_json::from_str(json).unwrap();
        assert!((scores.contradiction - 0.85).abs() < 1e-9);
    }
}
