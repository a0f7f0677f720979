//! Deterministic providers for tests
//!
//! `HashingEmbeddings` maps texts sharing words to nearby vectors without any
//! model, so retrieval behaviour can be asserted exactly.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{CrossEncoder, Embeddings, Error, Result};

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Bag-of-words embedder: every token adds 1.0 to a bucket picked by its
/// SHA-256, and the vector is L2-normalised
pub struct HashingEmbeddings {
    dimension: usize,
    calls: AtomicUsize,
}

impl HashingEmbeddings {
    /// Create with the given vector dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of texts embedded so far
    pub fn embedded_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            vector[idx] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embeddings for HashingEmbeddings {
    fn name(&self) -> &str {
        "hashing-mock"
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

/// Scores a passage by the share of query words it contains
#[derive(Default)]
pub struct KeywordCrossEncoder;

impl KeywordCrossEncoder {
    /// Create a keyword scorer
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CrossEncoder for KeywordCrossEncoder {
    fn name(&self) -> &str {
        "keyword-mock"
    }

    async fn score(&self, query: &str, text: &str) -> Result<f32> {
        let query_tokens: HashSet<String> = tokens(query).collect();
        if query_tokens.is_empty() {
            return Ok(0.0);
        }
        let text_tokens: HashSet<String> = tokens(text).collect();
        let hits = query_tokens.intersection(&text_tokens).count();
        Ok(hits as f32 / query_tokens.len() as f32)
    }
}

/// A scorer whose backend is down; every call fails
#[derive(Default)]
pub struct UnavailableCrossEncoder;

#[async_trait]
impl CrossEncoder for UnavailableCrossEncoder {
    fn name(&self) -> &str {
        "unavailable-mock"
    }

    async fn score(&self, _query: &str, _text: &str) -> Result<f32> {
        Err(Error::ProviderApi("reranker unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::rag::cosine_similarity;

    #[tokio::test]
    async fn test_hashing_embeddings_deterministic() {
        let embedder = HashingEmbeddings::new(64);
        let a = embedder.embed_query("Budget policy").await.unwrap();
        let b = embedder.embed_query("budget POLICY").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embedder.embedded_count(), 2);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = HashingEmbeddings::new(256);
        let query = embedder.embed_query("budget approvals").await.unwrap();
        let docs = embedder
            .embed_documents(&[
                "budget approvals need two signatures".to_string(),
                "economy class travel".to_string(),
            ])
            .await
            .unwrap();

        assert!(cosine_similarity(&query, &docs[0]) > cosine_similarity(&query, &docs[1]));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbeddings::new(8);
        let v = embedder.embed_query("  ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_keyword_cross_encoder() {
        let scorer = KeywordCrossEncoder::new();
        let scores = scorer
            .score_batch(
                "budget approvals",
                &["Budget approvals".to_string(), "budget".to_string(), "travel".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(scores, vec![1.0, 0.5, 0.0]);
    }

    #[tokio::test]
    async fn test_unavailable_cross_encoder() {
        let scorer = UnavailableCrossEncoder;
        assert!(scorer.score_batch("q", &["a".to_string()]).await.is_err());
    }
}
