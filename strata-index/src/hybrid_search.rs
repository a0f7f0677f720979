//! Hybrid retrieval: graph full-text search narrows the vector search
//!
//! One query runs these stages in order:
//!
//! 1. fuzzy full-text search on the graph, keeping hits above `min_graph_score`
//! 2. a hash filter over the graph hits, if there are any
//! 3. vector search for the top `k`, restricted by the filter
//! 4. unfiltered retry when the filter removed everything (flagged degraded)
//! 5. truncation to `k`
//! 6. cross-encoder rerank, keeping `rerank_top`
//! 7. assembly: direct graph snippets first, then vector passages, deduplicated
//!    by hash
//!
//! Every external call is bounded by the stage timeout. A failed or slow
//! stage degrades the result; only configuration-level errors are returned.

use crate::error::{IndexError, Result};
use crate::graph_store::{GraphHit, GraphStore};
use crate::reranker::{RerankStatus, Reranker};
use crate::vector_store::{HashFilter, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use strata_core::config::RetrievalConfig;
use strata_core::passage::{
    Passage, PassageSource, META_CATEGORY, META_HASH, META_LEVEL, META_NUMBER, META_PAGE,
    META_TITLE,
};
use strata_core::rag::Embeddings;
use tracing::{debug, info, warn};

/// Health of one backend stage for a single query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Failed,
    TimedOut,
}

impl StageStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    fn from_error(e: &IndexError) -> Self {
        match e {
            IndexError::Timeout { .. } => Self::TimedOut,
            _ => Self::Failed,
        }
    }
}

/// Why the result looks the way it does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// At least one passage returned
    Answered,
    /// Backends answered but nothing matched
    NoRelevantContent,
    /// Neither store responded
    BackendsUnreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub graph: StageStatus,
    pub vector: StageStatus,
    /// Vector search was restricted to graph-hit lineages
    pub filter_applied: bool,
    /// Filtered search came back empty and was retried unfiltered
    pub fallback_used: bool,
    pub degraded: bool,
    pub reranked: RerankStatus,
    pub outcome: Outcome,
    /// Errors absorbed along the way
    pub errors: Vec<String>,
}

/// Context for the downstream generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub context: String,
    /// Contributing passages, in context order, unique by hash
    pub passages: Vec<Passage>,
    /// Graph hits above the score threshold
    pub graph_candidate_count: usize,
    pub diagnostics: Diagnostics,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

pub struct HybridRetriever {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn Embeddings>,
    reranker: Reranker,
    config: RetrievalConfig,
}

impl HybridRetriever {
    /// Build a retriever over `collection`. A missing collection is fatal;
    /// an unreachable vector store is only logged.
    pub async fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embeddings: Arc<dyn Embeddings>,
        reranker: Reranker,
        config: RetrievalConfig,
        collection: &str,
    ) -> Result<Self> {
        match vectors.ensure_collection(collection).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Could not verify vector collection '{}': {}", collection, e),
        }

        Ok(Self {
            graph,
            vectors,
            embeddings,
            reranker,
            config,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    async fn stage<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.config.stage_timeout();
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or_else(|_| Err(IndexError::timeout(operation, timeout)))
    }

    /// Run the full pipeline for one query
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        let mut errors = Vec::new();

        // Graph search
        let (graph_status, hits) = match self
            .stage(
                "graph.full_text_search",
                self.graph.full_text_search(query, self.config.graph_candidates),
            )
            .await
        {
            Ok(hits) => (StageStatus::Ok, hits),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Graph stage degraded: {}", e);
                errors.push(format!("graph: {}", e));
                (StageStatus::from_error(&e), Vec::new())
            }
        };
        let hits: Vec<GraphHit> = hits
            .into_iter()
            .filter(|h| h.score > self.config.min_graph_score)
            .collect();
        debug!("{} graph candidates for '{}'", hits.len(), query);

        // Filter construction
        let filter = if hits.is_empty() {
            None
        } else {
            Some(HashFilter::new(hits.iter().map(|h| h.node.hash.clone())))
        };

        // Vector search with fallback, one query embedding for both searches
        let mut fallback_used = false;
        let searched = match self
            .stage("embeddings.embed_query", async {
                Ok(self.embeddings.embed_query(query).await?)
            })
            .await
        {
            Ok(embedding) => {
                self.search_with_fallback(&embedding, filter.as_ref(), &mut fallback_used)
                    .await
            }
            Err(e) => Err(e),
        };
        let (vector_status, mut vector_passages) = match searched {
            Ok(found) => (StageStatus::Ok, found),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Vector stage degraded: {}", e);
                errors.push(format!("vector: {}", e));
                (StageStatus::from_error(&e), Vec::new())
            }
        };
        vector_passages.truncate(self.config.k);

        // Rerank
        let reranked = self.reranker.rerank(query, vector_passages).await;
        if let Some(e) = &reranked.error {
            errors.push(format!("rerank: {}", e));
        }
        let (mut vector_passages, reranked) = (reranked.passages, reranked.status);
        if reranked == RerankStatus::Ranked {
            vector_passages.truncate(self.config.rerank_top);
        }

        // Assembly
        let direct: Vec<Passage> = if self.config.include_direct_graph_snippets {
            hits.iter()
                .filter(|h| !h.node.content.trim().is_empty())
                .take(self.config.max_direct_graph_snippets)
                .map(graph_passage)
                .collect()
        } else {
            Vec::new()
        };
        let passages = assemble(direct, vector_passages);
        let context = render_context(&passages);

        let outcome = if !passages.is_empty() {
            Outcome::Answered
        } else if !graph_status.is_ok() && !vector_status.is_ok() {
            Outcome::BackendsUnreachable
        } else {
            Outcome::NoRelevantContent
        };

        let degraded = fallback_used
            || !graph_status.is_ok()
            || !vector_status.is_ok()
            || (reranked == RerankStatus::Unranked && self.reranker.is_enabled());

        info!(
            graph_candidates = hits.len(),
            passages = passages.len(),
            fallback_used,
            degraded,
            "Retrieved context for query"
        );

        Ok(RetrievalResult {
            context,
            passages,
            graph_candidate_count: hits.len(),
            diagnostics: Diagnostics {
                graph: graph_status,
                vector: vector_status,
                filter_applied: filter.is_some(),
                fallback_used,
                degraded,
                reranked,
                outcome,
                errors,
            },
        })
    }

    async fn search_with_fallback(
        &self,
        embedding: &[f32],
        filter: Option<&HashFilter>,
        fallback_used: &mut bool,
    ) -> Result<Vec<Passage>> {
        let found = self.vector_search(embedding, filter).await?;
        if found.is_empty() && filter.is_some() {
            info!("Filtered vector search empty, retrying unfiltered");
            *fallback_used = true;
            return self.vector_search(embedding, None).await;
        }
        Ok(found)
    }

    async fn vector_search(&self, embedding: &[f32], filter: Option<&HashFilter>) -> Result<Vec<Passage>> {
        self.stage(
            "vector.search",
            self.vectors.search(embedding, self.config.k, filter),
        )
        .await
    }
}

fn graph_passage(hit: &GraphHit) -> Passage {
    let node = &hit.node;
    let mut metadata = HashMap::new();
    metadata.insert(META_HASH.to_string(), node.hash.clone());
    metadata.insert(META_LEVEL.to_string(), node.level.label().to_string());
    metadata.insert(META_TITLE.to_string(), node.title.clone());
    metadata.insert(META_NUMBER.to_string(), node.number.clone());
    if let Some(category) = &node.category {
        metadata.insert(META_CATEGORY.to_string(), category.clone());
    }
    if let Some(page) = node.page_number {
        metadata.insert(META_PAGE.to_string(), page.to_string());
    }

    Passage::new(node.hash.clone(), node.content.clone(), PassageSource::Graph)
        .with_metadata(metadata)
        .with_score(hit.score as f32)
}

/// Graph snippets first, then vector passages; the first copy of a hash wins
pub fn assemble(direct: Vec<Passage>, vector: Vec<Passage>) -> Vec<Passage> {
    let mut seen = HashSet::new();
    direct
        .into_iter()
        .chain(vector)
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

/// One labelled block per passage
pub fn render_context(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| {
            format!(
                "[{}] {}\n{}",
                p.source.label(),
                p.title().unwrap_or(&p.id),
                p.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_dedups_by_hash() {
        let direct = vec![Passage::new("c1", "graph copy", PassageSource::Graph)];
        let vector = vec![
            Passage::new("s1", "section", PassageSource::Vector),
            Passage::new("c1", "vector copy", PassageSource::Vector),
            Passage::new("s1", "section again", PassageSource::Vector),
        ];

        let passages = assemble(direct, vector);
        let ids: Vec<_> = passages.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "s1"]);
        assert_eq!(passages[0].source, PassageSource::Graph);
    }

    #[test]
    fn test_render_context_labels_sources() {
        let mut meta = HashMap::new();
        meta.insert(META_TITLE.to_string(), "Budget policy".to_string());
        let passages = vec![
            Passage::new("c1", "Two signatures. ", PassageSource::Graph).with_metadata(meta),
            Passage::new("s9", "Economy only", PassageSource::Vector),
        ];

        let context = render_context(&passages);
        assert_eq!(
            context,
            "[graph] Budget policy\nTwo signatures.\n\n[vector] s9\nEconomy only"
        );
    }
}
