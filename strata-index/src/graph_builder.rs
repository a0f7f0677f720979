//! Graph Builder: materializes the hierarchy into the graph store and links
//! same-level nodes of different documents whose embeddings are close
//!
//! Every document subtree is written as one idempotent batch. A document
//! already in the graph is reported as skipped when the batch adds nothing,
//! and as extended when a later shard contributed new nodes to it.

use crate::error::{IndexError, Result};
use crate::graph_store::{GraphBatch, GraphEdge, GraphNode, GraphStore, NodeKey, RelType};
use crate::record::{HierNode, Level};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::rag::{cosine_similarity, Embeddings};
use strata_core::retry::RetryPolicy;
use tracing::{debug, info};

/// What happened to one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentOutcome {
    /// New document, written with this many nodes and CONTAINS edges
    Loaded { nodes: usize, edges: usize },
    /// Known document that gained nodes or edges from this record
    Extended { nodes: usize, edges: usize },
    /// Known document, nothing new
    Skipped,
}

/// Totals over a corpus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphReport {
    pub documents_loaded: usize,
    pub documents_extended: usize,
    pub documents_skipped: usize,
    pub nodes_created: usize,
    pub contains_edges: usize,
    pub similar_edges: usize,
}

impl GraphReport {
    pub fn record(&mut self, outcome: DocumentOutcome) {
        match outcome {
            DocumentOutcome::Loaded { nodes, edges } => {
                self.documents_loaded += 1;
                self.nodes_created += nodes;
                self.contains_edges += edges;
            }
            DocumentOutcome::Extended { nodes, edges } => {
                self.documents_extended += 1;
                self.nodes_created += nodes;
                self.contains_edges += edges;
            }
            DocumentOutcome::Skipped => self.documents_skipped += 1,
        }
    }

    pub fn merge(&mut self, other: GraphReport) {
        self.documents_loaded += other.documents_loaded;
        self.documents_extended += other.documents_extended;
        self.documents_skipped += other.documents_skipped;
        self.nodes_created += other.nodes_created;
        self.contains_edges += other.contains_edges;
        self.similar_edges += other.similar_edges;
    }
}

/// One node offered for similarity linking
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCandidate {
    pub key: NodeKey,
    /// Hash of the owning document, when known
    pub document: Option<String>,
    pub embedding: Vec<f32>,
}

pub struct GraphBuilder {
    graph: Arc<dyn GraphStore>,
    retry: RetryPolicy,
}

impl GraphBuilder {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Write one document subtree. Every node must already carry a hash.
    pub async fn ingest_document(&self, category: &str, doc: &HierNode) -> Result<DocumentOutcome> {
        let doc_key = NodeKey::new(doc.level, required_hash(doc)?);

        let exists = self
            .retry
            .run("graph.node_exists", IndexError::is_retryable, || {
                self.graph.node_exists(doc_key.clone())
            })
            .await?;

        // Shards of a known document may still carry nodes the graph lacks
        let mut batch = GraphBatch::default();
        collect_subtree(category, doc, None, &mut batch)?;

        let outcome = self
            .retry
            .run("graph.upsert_batch", IndexError::is_retryable, || {
                self.graph.upsert_batch(batch.clone())
            })
            .await?;
        let (nodes, edges) = (outcome.nodes_created, outcome.edges_created);

        if !exists {
            info!(
                "Loaded document '{}': {} nodes, {} CONTAINS edges",
                doc.title, nodes, edges
            );
            Ok(DocumentOutcome::Loaded { nodes, edges })
        } else if nodes > 0 || edges > 0 {
            info!(
                "Extended document '{}': {} new nodes, {} new CONTAINS edges",
                doc.title, nodes, edges
            );
            Ok(DocumentOutcome::Extended { nodes, edges })
        } else {
            debug!("Document '{}' already in graph, nothing new", doc.title);
            Ok(DocumentOutcome::Skipped)
        }
    }

    /// Create SIMILAR_TO edges between every cross-document pair of `nodes`
    /// whose cosine similarity is at least `threshold`. Returns the number of
    /// new edges.
    pub async fn link_similar(&self, nodes: &[LinkCandidate], threshold: f32) -> Result<usize> {
        let edges = similar_pairs(nodes, threshold);
        if edges.is_empty() {
            return Ok(0);
        }

        let batch = GraphBatch {
            nodes: Vec::new(),
            edges,
        };
        let outcome = self
            .retry
            .run("graph.link_similar", IndexError::is_retryable, || {
                self.graph.upsert_batch(batch.clone())
            })
            .await?;
        Ok(outcome.edges_created)
    }

    /// Embed every node stored at `level` and link the similar ones
    pub async fn link_similar_level(
        &self,
        level: Level,
        embeddings: &dyn Embeddings,
        threshold: f32,
        batch_size: usize,
    ) -> Result<usize> {
        let nodes = self.graph.nodes_at_level(level).await?;
        if nodes.len() < 2 {
            return Ok(0);
        }
        let parents = parent_map(self.graph.edges_of_type(RelType::Contains).await?);

        let mut embedded = Vec::with_capacity(nodes.len());
        for chunk in nodes.chunks(batch_size.max(1)) {
            let texts: Vec<String> = chunk.iter().map(similarity_text).collect();
            let vectors = embeddings.embed_documents(&texts).await?;
            if vectors.len() != chunk.len() {
                return Err(IndexError::Custom(format!(
                    "{} returned {} embeddings for {} texts",
                    embeddings.name(),
                    vectors.len(),
                    chunk.len()
                )));
            }
            embedded.extend(chunk.iter().zip(vectors).map(|(node, embedding)| {
                let key = node.key();
                LinkCandidate {
                    document: document_of(&key, &parents),
                    key,
                    embedding,
                }
            }));
        }

        let written = self.link_similar(&embedded, threshold).await?;
        info!(
            "Linked {} {} nodes with {} SIMILAR_TO edges",
            nodes.len(),
            level,
            written
        );
        Ok(written)
    }
}

fn required_hash(node: &HierNode) -> Result<&str> {
    node.hash.as_deref().ok_or_else(|| {
        IndexError::InvalidRecord(format!(
            "{} '{}' has no hash; resolve identities first",
            node.level, node.title
        ))
    })
}

fn collect_subtree(
    category: &str,
    node: &HierNode,
    parent: Option<&NodeKey>,
    batch: &mut GraphBatch,
) -> Result<()> {
    let key = NodeKey::new(node.level, required_hash(node)?);

    batch.nodes.push(GraphNode {
        level: node.level,
        hash: key.hash.clone(),
        title: node.title.clone(),
        number: node.number.clone(),
        content: node.content.clone(),
        page_number: node.page_number,
        category: Some(category.to_string()),
    });
    if let Some(parent) = parent {
        batch.edges.push(GraphEdge::contains(parent.clone(), key.clone()));
    }

    for child in &node.children {
        collect_subtree(category, child, Some(&key), batch)?;
    }
    Ok(())
}

fn similarity_text(node: &GraphNode) -> String {
    if node.content.trim().is_empty() {
        node.title.clone()
    } else {
        format!("{}\n{}", node.title, node.content)
    }
}

/// Child -> parent over CONTAINS edges
fn parent_map(edges: Vec<GraphEdge>) -> HashMap<NodeKey, NodeKey> {
    edges.into_iter().map(|e| (e.to, e.from)).collect()
}

/// Hash of the document above `key`, or `None` for an orphan
fn document_of(key: &NodeKey, parents: &HashMap<NodeKey, NodeKey>) -> Option<String> {
    let mut current = key;
    // Hierarchy depth is bounded; the cap guards against cyclic edges
    for _ in 0..=parents.len() {
        if current.level == Level::Document {
            return Some(current.hash.clone());
        }
        current = parents.get(current)?;
    }
    None
}

fn same_document(a: &LinkCandidate, b: &LinkCandidate) -> bool {
    matches!((&a.document, &b.document), (Some(x), Some(y)) if x == y)
}

/// Every unordered same-level pair from different documents at or above
/// `threshold`, endpoints in input order
pub fn similar_pairs(nodes: &[LinkCandidate], threshold: f32) -> Vec<GraphEdge> {
    let mut edges: Vec<(usize, usize, f32)> = (0..nodes.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            let a = &nodes[i];
            nodes[i + 1..]
                .iter()
                .enumerate()
                .filter(move |(_, b)| {
                    b.key.level == a.key.level && b.key.hash != a.key.hash && !same_document(a, b)
                })
                .filter_map(move |(offset, b)| {
                    let score = cosine_similarity(&a.embedding, &b.embedding);
                    (score >= threshold).then_some((i, i + 1 + offset, score))
                })
        })
        .collect();

    edges.sort_by_key(|(i, j, _)| (*i, *j));
    edges
        .into_iter()
        .map(|(i, j, score)| GraphEdge::similar(nodes[i].key.clone(), nodes[j].key.clone(), score))
        .collect()
}
