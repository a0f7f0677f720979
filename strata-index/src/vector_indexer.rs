//! Vector Indexer: embeds every node with content and upserts it keyed by
//! the node hash, with the full ancestor lineage in its metadata

use crate::error::{IndexError, Result};
use crate::record::{Corpus, HierNode};
use crate::vector_store::{VectorRecord, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::passage::{
    flatten_metadata, META_CATEGORY, META_HASH, META_HASH_PREFIX, META_LEVEL, META_LINEAGE,
    META_NUMBER, META_PAGE, META_TITLE,
};
use strata_core::rag::Embeddings;
use strata_core::retry::RetryPolicy;
use tracing::{debug, info};

/// Counts from one indexing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorReport {
    /// Nodes with non-empty content
    pub candidates: usize,
    /// Already stored under their hash, not re-embedded
    pub already_indexed: usize,
    pub embedded: usize,
    /// Ids that did not exist before the upsert
    pub inserted: usize,
}

pub struct VectorIndexer {
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn Embeddings>,
    batch_size: usize,
    retry: RetryPolicy,
}

/// A node waiting for its embedding
struct Pending {
    id: String,
    content: String,
    metadata: HashMap<String, String>,
}

impl VectorIndexer {
    pub fn new(vectors: Arc<dyn VectorStore>, embeddings: Arc<dyn Embeddings>) -> Self {
        Self {
            vectors,
            embeddings,
            batch_size: 32,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Index every node of the corpus that has content. Nodes must already
    /// carry hashes.
    pub async fn index_corpus(&self, corpus: &Corpus) -> Result<VectorReport> {
        let mut pending = Vec::new();
        let mut missing_hash = None;

        corpus.walk(|category, ancestors, node| {
            if !node.has_content() {
                return;
            }
            match &node.hash {
                Some(hash) => pending.push(Pending {
                    id: hash.clone(),
                    content: node.content.clone(),
                    metadata: node_metadata(category, ancestors, node),
                }),
                None => {
                    missing_hash.get_or_insert_with(|| format!("{} '{}'", node.level, node.title));
                }
            }
        });

        if let Some(node) = missing_hash {
            return Err(IndexError::InvalidRecord(format!(
                "{} has no hash; resolve identities first",
                node
            )));
        }

        let mut report = VectorReport {
            candidates: pending.len(),
            ..Default::default()
        };

        for batch in pending.chunks(self.batch_size) {
            self.index_batch(batch, &mut report).await?;
        }

        info!(
            "Vector indexing done: {} candidates, {} embedded, {} already indexed",
            report.candidates, report.embedded, report.already_indexed
        );
        Ok(report)
    }

    async fn index_batch(&self, batch: &[Pending], report: &mut VectorReport) -> Result<()> {
        let ids: Vec<String> = batch.iter().map(|p| p.id.clone()).collect();
        let existing = self
            .retry
            .run("vector.existing_ids", IndexError::is_retryable, || {
                self.vectors.existing_ids(&ids)
            })
            .await?;

        let todo: Vec<&Pending> = batch.iter().filter(|p| !existing.contains(&p.id)).collect();
        report.already_indexed += batch.len() - todo.len();
        if todo.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = todo.iter().map(|p| p.content.clone()).collect();
        let vectors = self
            .retry
            .run(
                "embeddings.embed_documents",
                strata_core::Error::is_retryable,
                || self.embeddings.embed_documents(&texts),
            )
            .await?;
        if vectors.len() != todo.len() {
            return Err(IndexError::Custom(format!(
                "{} returned {} embeddings for {} texts",
                self.embeddings.name(),
                vectors.len(),
                todo.len()
            )));
        }
        report.embedded += vectors.len();

        let records: Vec<VectorRecord> = todo
            .into_iter()
            .zip(vectors)
            .map(|(p, embedding)| VectorRecord {
                id: p.id.clone(),
                embedding,
                content: p.content.clone(),
                metadata: p.metadata.clone(),
            })
            .collect();

        let inserted = self
            .retry
            .run("vector.upsert", IndexError::is_retryable, || {
                self.vectors.upsert(records.clone())
            })
            .await?;
        report.inserted += inserted;
        debug!("Upserted {} vectors ({} new)", records.len(), inserted);
        Ok(())
    }
}

/// Flat metadata for one node: per-level hash/title/number for every
/// ancestor and the node itself, plus category, level, page and lineage
pub fn node_metadata(category: &str, ancestors: &[&HierNode], node: &HierNode) -> HashMap<String, String> {
    let mut map = Map::new();

    for n in ancestors.iter().copied().chain(std::iter::once(node)) {
        let key = n.level.key();
        if let Some(hash) = &n.hash {
            map.insert(format!("{}{}", META_HASH_PREFIX, key), json!(hash));
        }
        map.insert(format!("title_{}", key), json!(n.title));
        if !n.number.is_empty() {
            map.insert(format!("number_{}", key), json!(n.number));
        }
    }

    let lineage: Vec<&str> = ancestors.iter().filter_map(|a| a.hash.as_deref()).collect();
    map.insert(META_LINEAGE.to_string(), json!(lineage));

    map.insert(META_CATEGORY.to_string(), json!(category));
    map.insert(META_LEVEL.to_string(), json!(node.level.label()));
    map.insert(META_TITLE.to_string(), json!(node.title));
    map.insert(META_NUMBER.to_string(), json!(node.number));
    map.insert(META_HASH.to_string(), json!(node.hash));
    map.insert(
        META_PAGE.to_string(),
        node.page_number.map_or(Value::Null, |p| json!(p)),
    );

    flatten_metadata(map)
}
