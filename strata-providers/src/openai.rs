//! OpenAI embeddings client
//!
//! Also works with OpenAI-compatible `/embeddings` endpoints (vLLM, LiteLLM, etc).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{check_status, Embeddings, Error, HttpConfig, Result};

/// Default embedding model
pub const TEXT_EMBEDDING_3_SMALL: &str = "text-embedding-3-small";

/// OpenAI embeddings client
pub struct OpenAIEmbeddings {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAIEmbeddings {
    /// Create from API key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, "https://api.openai.com/v1")
    }

    /// Create from environment variables
    ///
    /// Reads `OPENAI_API_KEY`, and optionally `OPENAI_BASE_URL` and
    /// `OPENAI_EMBEDDING_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::ProviderAuth("OPENAI_API_KEY not set".to_string()))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let client = Self::with_base_url(api_key, base_url)?;

        Ok(match std::env::var("OPENAI_EMBEDDING_MODEL") {
            Ok(model) => client.with_model(model),
            Err(_) => client,
        })
    }

    /// Create with custom base URL (for compatible APIs)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = HttpConfig::default().build_client()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: TEXT_EMBEDDING_3_SMALL.to_string(),
            dimensions: None,
        })
    }

    /// Use another embedding model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Ask the API to shorten vectors to `dimensions`
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::ProviderAuth(e.to_string()))?,
        );
        Ok(headers)
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
    index: usize,
    embedding: Vec<f32>,
}

/// Put vectors back in input order and check that every input got one
fn ordered_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    data.sort_by_key(|d| d.index);
    let in_order = data.iter().enumerate().all(|(i, d)| d.index == i);
    if data.len() != expected || !in_order {
        return Err(Error::ProviderResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl Embeddings for OpenAIEmbeddings {
    fn name(&self) -> &str {
        "openai"
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

        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
            dimensions: self.dimensions,
        };
        debug!(model = %self.model, count = texts.len(), "Requesting embeddings");

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .headers(self.build_headers()?)
            .json(&request)
            .send()
            .await?;
        let response = check_status("OpenAI Embeddings", response).await?;

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            Error::ProviderResponse(format!("Failed to parse embedding response: {}", e))
        })?;
        ordered_embeddings(body.data, texts.len())
    }
}
