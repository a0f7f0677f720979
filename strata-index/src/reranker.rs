//! Second-stage reranking with a pairwise cross-encoder
//!
//! A missing, failing or slow scorer never fails the query: passages come
//! back in their retrieval order, tagged unranked.

use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use strata_core::passage::Passage;
use strata_core::rag::CrossEncoder;
use tracing::warn;

/// How the reranked list was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankStatus {
    /// Sorted by cross-encoder score
    Ranked,
    /// Scorer unavailable or failed; retrieval order kept
    Unranked,
    /// Nothing to rank
    Skipped,
}

/// Passages after the rerank stage
#[derive(Debug)]
pub struct Reranked {
    pub passages: Vec<Passage>,
    pub status: RerankStatus,
    /// Why the scorer could not rank, when it was asked and failed
    pub error: Option<IndexError>,
}

impl Reranked {
    fn unranked(passages: Vec<Passage>, error: Option<IndexError>) -> Self {
        Self {
            passages,
            status: RerankStatus::Unranked,
            error,
        }
    }
}

pub struct Reranker {
    scorer: Option<Arc<dyn CrossEncoder>>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn CrossEncoder>, timeout: Duration) -> Self {
        Self {
            scorer: Some(scorer),
            timeout,
        }
    }

    /// A reranker with no scorer; every call returns retrieval order
    pub fn disabled() -> Self {
        Self {
            scorer: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.scorer.is_some()
    }

    /// Sort `passages` by descending relevance to `query`; equal scores keep
    /// their input order. Scores replace the passages' first-stage scores.
    pub async fn rerank(&self, query: &str, passages: Vec<Passage>) -> Reranked {
        if passages.is_empty() {
            return Reranked {
                passages,
                status: RerankStatus::Skipped,
                error: None,
            };
        }
        let Some(scorer) = &self.scorer else {
            return Reranked::unranked(passages, None);
        };

        let texts: Vec<String> = passages.iter().map(|p| p.content.clone()).collect();
        let failure = match tokio::time::timeout(self.timeout, scorer.score_batch(query, &texts)).await {
            Ok(Ok(scores)) if scores.len() == passages.len() => {
                return Reranked {
                    passages: sort_by_scores(scores, passages),
                    status: RerankStatus::Ranked,
                    error: None,
                };
            }
            Ok(Ok(scores)) => format!(
                "{} returned {} scores for {} passages",
                scorer.name(),
                scores.len(),
                passages.len()
            ),
            Ok(Err(e)) => format!("{}: {}", scorer.name(), e),
            Err(_) => format!("{} timed out after {:?}", scorer.name(), self.timeout),
        };

        warn!("Rerank failed, keeping retrieval order: {}", failure);
        Reranked::unranked(passages, Some(IndexError::RerankFailure(failure)))
    }
}

fn sort_by_scores(scores: Vec<f32>, passages: Vec<Passage>) -> Vec<Passage> {
    let mut scored: Vec<(f32, Passage)> = scores.into_iter().zip(passages).collect();
    // Stable: equal scores keep retrieval order. NaN sorts last.
    scored.sort_by(|a, b| match (a.0.is_nan(), b.0.is_nan()) {
        (false, false) => b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    });

    scored
        .into_iter()
        .map(|(score, passage)| passage.with_score(score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strata_core::passage::PassageSource;

    /// Scores by a fixed table; unknown texts get 0.0
    struct TableScorer(Vec<(&'static str, f32)>);

    #[async_trait]
    impl CrossEncoder for TableScorer {
        fn name(&self) -> &str {
            "table"
        }

        async fn score(&self, _query: &str, text: &str) -> strata_core::Result<f32> {
            Ok(self
                .0
                .iter()
                .find(|(t, _)| *t == text)
                .map_or(0.0, |(_, s)| *s))
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl CrossEncoder for FailingScorer {
        fn name(&self) -> &str {
            "failing"
        }

        async fn score(&self, _query: &str, _text: &str) -> strata_core::Result<f32> {
            Err(strata_core::Error::ProviderApi("model not loaded".to_string()))
        }
    }

    fn passages(texts: &[&str]) -> Vec<Passage> {
        texts
            .iter()
            .map(|t| Passage::new(*t, *t, PassageSource::Vector))
            .collect()
    }

    fn ids(passages: &[Passage]) -> Vec<&str> {
        passages.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_rerank_descending_and_stable() {
        let scorer = TableScorer(vec![("a", 0.1), ("b", 0.9), ("c", 0.5), ("d", 0.5)]);
        let reranker = Reranker::new(Arc::new(scorer), Duration::from_secs(1));

        let ranked = reranker.rerank("q", passages(&["a", "c", "b", "d"])).await;
        assert_eq!(ranked.status, RerankStatus::Ranked);
        assert_eq!(ids(&ranked.passages), vec!["b", "c", "d", "a"]);
        assert_eq!(ranked.passages[0].score, Some(0.9));
        assert!(ranked.error.is_none());
    }

    #[tokio::test]
    async fn test_failing_scorer_keeps_order() {
        let reranker = Reranker::new(Arc::new(FailingScorer), Duration::from_secs(1));
        let ranked = reranker.rerank("q", passages(&["x", "y", "z"])).await;
        assert_eq!(ranked.status, RerankStatus::Unranked);
        assert_eq!(ids(&ranked.passages), vec!["x", "y", "z"]);
        match ranked.error {
            Some(IndexError::RerankFailure(msg)) => assert!(msg.contains("model not loaded")),
            other => panic!("expected rerank failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_and_empty() {
        let reranker = Reranker::disabled();
        let ranked = reranker.rerank("q", passages(&["x", "y"])).await;
        assert_eq!(ranked.status, RerankStatus::Unranked);
        assert_eq!(ids(&ranked.passages), vec!["x", "y"]);
        assert!(ranked.error.is_none());

        let ranked = reranker.rerank("q", Vec::new()).await;
        assert_eq!(ranked.status, RerankStatus::Skipped);
        assert!(ranked.passages.is_empty());
    }
}
