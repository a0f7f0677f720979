//! Offline ingestion: identity resolution, then the graph and vector loads
//! side by side over the same resolved corpus
//!
//! Both loads are append/upsert-only, so they can run while queries are
//! being served. A failure in one load is reported without undoing the other.

use crate::content_hash::{HashRegistry, IdentityReport, IdentityResolver};
use crate::error::{IndexError, Result};
use crate::graph_builder::{GraphBuilder, GraphReport};
use crate::graph_store::GraphStore;
use crate::record::{Corpus, Level};
use crate::vector_indexer::{VectorIndexer, VectorReport};
use crate::vector_store::VectorStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use strata_core::config::IngestConfig;
use strata_core::rag::Embeddings;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub identity: IdentityReport,
    pub graph: GraphReport,
    pub vector: VectorReport,
    /// Set when the graph load stopped early
    pub graph_error: Option<String>,
    /// Set when the vector load stopped early
    pub vector_error: Option<String>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.graph_error.is_none() && self.vector_error.is_none()
    }
}

pub struct Ingestor {
    graph_builder: GraphBuilder,
    vector_indexer: VectorIndexer,
    resolver: IdentityResolver,
    embeddings: Arc<dyn Embeddings>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embeddings: Arc<dyn Embeddings>,
        config: IngestConfig,
    ) -> Self {
        let graph_builder = GraphBuilder::new(graph).with_retry(config.retry);
        let vector_indexer = VectorIndexer::new(vectors, Arc::clone(&embeddings))
            .with_batch_size(config.embed_batch_size)
            .with_retry(config.retry);

        Self {
            graph_builder,
            vector_indexer,
            resolver: IdentityResolver::new(config.excerpt_chars),
            embeddings,
            config,
        }
    }

    /// Resolve identities against `registry`, then load both stores
    ///
    /// Fatal store errors are returned; anything else is recorded in the
    /// report.
    pub async fn ingest(&self, corpus: &mut Corpus, registry: &mut HashRegistry) -> Result<IngestReport> {
        let identity = self.resolver.resolve_corpus(corpus, registry);
        let corpus: &Corpus = corpus;

        let (graph, vector) = futures::join!(
            self.load_graph(corpus),
            self.vector_indexer.index_corpus(corpus)
        );

        let mut report = IngestReport {
            identity,
            ..Default::default()
        };

        let (graph, graph_error) = graph;
        report.graph = graph;
        match graph_error {
            None => {}
            Some(e) if e.is_fatal() => return Err(e),
            Some(e) => {
                error!("Graph load failed: {}", e);
                report.graph_error = Some(e.to_string());
            }
        }
        match vector {
            Ok(vector) => report.vector = vector,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Vector load failed: {}", e);
                report.vector_error = Some(e.to_string());
            }
        }

        info!(
            documents_loaded = report.graph.documents_loaded,
            documents_extended = report.graph.documents_extended,
            documents_skipped = report.graph.documents_skipped,
            similar_edges = report.graph.similar_edges,
            vectors_embedded = report.vector.embedded,
            conflicts = report.identity.conflicts.len(),
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Ingest several export files in order against one registry, loaded
    /// from and saved back to `registry_path` when configured
    pub async fn ingest_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<IngestReport> {
        let mut registry = match &self.config.registry_path {
            Some(path) => HashRegistry::load(path)?,
            None => HashRegistry::new(),
        };

        let mut total = IngestReport::default();
        for path in paths {
            info!("Ingesting {:?}", path.as_ref());
            let mut corpus = Corpus::load(path)?;
            let report = self.ingest(&mut corpus, &mut registry).await?;
            merge_reports(&mut total, report);
        }

        if let Some(path) = &self.config.registry_path {
            registry.save(path)?;
        }
        Ok(total)
    }

    /// Counts cover everything written before a failure
    async fn load_graph(&self, corpus: &Corpus) -> (GraphReport, Option<IndexError>) {
        let mut report = GraphReport::default();
        for category in &corpus.categories {
            for doc in &category.documents {
                match self.graph_builder.ingest_document(&category.name, doc).await {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => return (report, Some(e)),
                }
            }
        }

        if self.config.link_similar {
            for level in Level::ALL {
                let linked = self
                    .graph_builder
                    .link_similar_level(
                        level,
                        self.embeddings.as_ref(),
                        self.config.similarity_threshold,
                        self.config.embed_batch_size,
                    )
                    .await;
                match linked {
                    Ok(written) => report.similar_edges += written,
                    Err(e) => return (report, Some(e)),
                }
            }
        }
        (report, None)
    }
}

fn merge_reports(total: &mut IngestReport, report: IngestReport) {
    total.identity.merge(report.identity);

    total.graph.merge(report.graph);

    let v = report.vector;
    total.vector.candidates += v.candidates;
    total.vector.already_indexed += v.already_indexed;
    total.vector.embedded += v.embedded;
    total.vector.inserted += v.inserted;

    total.graph_error = total.graph_error.take().or(report.graph_error);
    total.vector_error = total.vector_error.take().or(report.vector_error);
}
