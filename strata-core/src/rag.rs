//! Capability interfaces consumed by the engine
//!
//! Concrete clients (HTTP embedding services, cross-encoder servers, test
//! doubles) live in `strata-providers`.

use crate::error::Result;
use async_trait::async_trait;

/// Interface for embedding providers
#[async_trait]
pub trait Embeddings: Send + Sync {
    /// Provider name for diagnostics
    fn name(&self) -> &str;

    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of documents, one vector per input, in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Interface for pairwise relevance scorers (cross-encoders)
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Scorer name for diagnostics
    fn name(&self) -> &str;

    /// Relevance of `text` to `query`; higher is more relevant
    async fn score(&self, query: &str, text: &str) -> Result<f32>;

    /// Score several passages against one query, one score per input
    ///
    /// Backends with a batch endpoint should override this.
    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(texts.len());
        for text in texts {
            scores.push(self.score(query, text).await?);
        }
        Ok(scores)
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
