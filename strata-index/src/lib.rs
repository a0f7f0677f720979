//! # Strata Index: graph + vector hybrid retrieval
//!
//! Two independently queried stores kept consistent through one content
//! hash per hierarchy node:
//! - **Content identity**: deterministic SHA-256 node hashes and a registry
//!   that keeps the first-seen hash per natural key across export shards
//! - **Graph store**: SQLite nodes/edges with an FTS5 index over
//!   `(title, content)`, behind a bounded connection pool
//! - **Vector store**: one cosine collection keyed by node hash, with every
//!   ancestor hash in the point metadata
//! - **Hybrid retrieval**: graph full-text hits filter the vector search,
//!   with fallback, cross-encoder rerank and deduplicated context assembly
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_core::config::StrataConfig;
//! use strata_index::{
//!     FlatVectorStore, HybridRetriever, Ingestor, Reranker, SqliteGraphStore,
//! };
//! use strata_providers::mock::{HashingEmbeddings, KeywordCrossEncoder};
//!
//! # async fn run() -> strata_index::Result<()> {
//! let config = StrataConfig::from_yaml_file("strata.yaml")?;
//! let graph = Arc::new(SqliteGraphStore::open(&config.graph).await?);
//! let vectors = Arc::new(FlatVectorStore::open(&config.vector)?);
//! let embeddings = Arc::new(HashingEmbeddings::new(config.vector.dimension));
//!
//! let ingestor = Ingestor::new(graph.clone(), vectors.clone(), embeddings.clone(), config.ingest.clone());
//! ingestor.ingest_files(&["export.json"]).await?;
//! vectors.flush()?;
//!
//! let reranker = Reranker::new(
//!     Arc::new(KeywordCrossEncoder::new()),
//!     config.retrieval.stage_timeout(),
//! );
//! let retriever = HybridRetriever::new(
//!     graph,
//!     vectors,
//!     embeddings,
//!     reranker,
//!     config.retrieval.clone(),
//!     &config.vector.collection,
//! )
//! .await?;
//!
//! let result = retriever.retrieve("budget approvals").await?;
//! println!("{}", result.context);
//! # Ok(())
//! # }
//! ```

pub mod content_hash;
pub mod error;
pub mod graph_builder;
pub mod graph_store;
pub mod hybrid_search;
pub mod ingest;
pub mod pool;
pub mod record;
pub mod reranker;
pub mod vector_indexer;
pub mod vector_store;

pub use content_hash::{
    compute_hash, ensure_hash, HashOutcome, HashRegistry, IdentityConflict, IdentityReport,
    IdentityResolver,
};
pub use error::{IndexError, Result};
pub use graph_builder::{DocumentOutcome, GraphBuilder, GraphReport, LinkCandidate};
pub use graph_store::{
    GraphEdge, GraphHit, GraphNode, GraphStats, GraphStore, NodeKey, RelType, SqliteGraphStore,
};
pub use hybrid_search::{Diagnostics, HybridRetriever, Outcome, RetrievalResult, StageStatus};
pub use ingest::{IngestReport, Ingestor};
pub use pool::GraphPool;
pub use record::{Corpus, HierNode, Level};
pub use reranker::{RerankStatus, Reranked, Reranker};
pub use vector_indexer::{VectorIndexer, VectorReport};
pub use vector_store::{FlatVectorStore, HashFilter, VectorRecord, VectorStore};
