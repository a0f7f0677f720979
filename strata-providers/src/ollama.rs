//! Ollama embeddings client
//!
//! Uses the native `/api/embed` endpoint, which takes a batch of inputs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{check_status, Embeddings, Error, HttpConfig, Result};

/// Default local embedding model
pub const NOMIC_EMBED_TEXT: &str = "nomic-embed-text";

/// Ollama embeddings client
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddings {
    /// Create with custom Ollama server URL
    ///
    /// Default Ollama URL is `http://localhost:11434`
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = HttpConfig::default().build_client()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Create from `OLLAMA_BASE_URL` and `OLLAMA_EMBEDDING_MODEL`, falling
    /// back to the local server and `nomic-embed-text`
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        let model = std::env::var("OLLAMA_EMBEDDING_MODEL")
            .unwrap_or_else(|_| NOMIC_EMBED_TEXT.to_string());
        Self::new(base_url, model)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embeddings for OllamaEmbeddings {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::ProviderResponse("No embedding returned".to_string()))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;
        let response = check_status("Ollama", response).await?;

        let body: EmbedResponse = response.json().await.map_err(|e| {
            Error::ProviderResponse(format!("Failed to parse embedding response: {}", e))
        })?;
        if body.embeddings.len() != texts.len() {
            return Err(Error::ProviderResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let body: EmbedResponse =
            serde_json::from_str(r#"{"model": "nomic-embed-text", "embeddings": [[0.1, 0.2]]}"#)
                .unwrap();
        assert_eq!(body.embeddings, vec![vec![0.1, 0.2]]);
    }

    #[test]
    fn test_new_trims_url() {
        let client = OllamaEmbeddings::new("http://localhost:11434/", NOMIC_EMBED_TEXT).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.name(), "ollama");
    }
}
