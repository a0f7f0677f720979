//! Cross-encoder client for text-embeddings-inference (`/rerank`)
//!
//! One request scores every passage against the query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{check_status, CrossEncoder, Error, HttpConfig, Result};

/// Reranker served by a text-embeddings-inference instance
pub struct TeiReranker {
    client: reqwest::Client,
    base_url: String,
}

impl TeiReranker {
    /// Create for a server URL such as `http://localhost:8080`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(base_url, HttpConfig::default())
    }

    /// Create with explicit HTTP settings
    pub fn with_config(base_url: impl Into<String>, config: HttpConfig) -> Result<Self> {
        Ok(Self {
            client: config.build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create from `TEI_RERANK_URL`
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("TEI_RERANK_URL")
            .map_err(|_| Error::config("TEI_RERANK_URL not set"))?;
        Self::new(base_url)
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    raw_scores: bool,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

/// Scores in input order; every input must be scored exactly once
fn scores_by_index(ranked: Vec<RerankScore>, expected: usize) -> Result<Vec<f32>> {
    let mut scores = vec![None; expected];
    for item in ranked {
        match scores.get_mut(item.index) {
            Some(slot) if slot.is_none() => *slot = Some(item.score),
            _ => {
                return Err(Error::ProviderResponse(format!(
                    "unexpected rerank index {}",
                    item.index
                )))
            }
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            s.ok_or_else(|| Error::ProviderResponse(format!("no rerank score for passage {}", i)))
        })
        .collect()
}

#[async_trait]
impl CrossEncoder for TeiReranker {
    fn name(&self) -> &str {
        "tei"
    }

    async fn score(&self, query: &str, text: &str) -> Result<f32> {
        let scores = self.score_batch(query, &[text.to_string()]).await?;
        scores
            .first()
            .copied()
            .ok_or_else(|| Error::ProviderResponse("No rerank score returned".to_string()))
    }

    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&RerankRequest {
                query,
                texts,
                raw_scores: false,
            })
            .send()
            .await?;
        let response = check_status("TEI rerank", response).await?;

        let ranked: Vec<RerankScore> = response.json().await.map_err(|e| {
            Error::ProviderResponse(format!("Failed to parse rerank response: {}", e))
        })?;
        scores_by_index(ranked, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_restored_to_input_order() {
        let ranked: Vec<RerankScore> = serde_json::from_str(
            r#"[{"index": 2, "score": 0.9}, {"index": 0, "score": 0.5}, {"index": 1, "score": 0.1}]"#,
        )
        .unwrap();
        assert_eq!(scores_by_index(ranked, 3).unwrap(), vec![0.5, 0.1, 0.9]);
    }

    #[test]
    fn test_missing_or_duplicate_index() {
        let missing = vec![RerankScore { index: 0, score: 0.5 }];
        assert!(scores_by_index(missing, 2).is_err());

        let duplicate = vec![
            RerankScore { index: 0, score: 0.5 },
            RerankScore { index: 0, score: 0.4 },
        ];
        assert!(scores_by_index(duplicate, 2).is_err());
    }
}
