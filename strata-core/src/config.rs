//! Engine configuration
//!
//! Every section has sensible defaults so a partial YAML file is enough:
//!
//! ```yaml
//! graph:
//!   db_path: data/graph.db
//!   pool_size: 8
//! retrieval:
//!   min_graph_score: 5.0
//!   k: 20
//! ```

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Graph store settings
    pub graph: GraphConfig,
    /// Vector store settings
    pub vector: VectorConfig,
    /// Query-time pipeline settings
    pub retrieval: RetrievalConfig,
    /// Ingestion settings
    pub ingest: IngestConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl StrataConfig {
    /// Parse configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {:?}: {}", path, e)))?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values no pipeline can run with
    pub fn validate(&self) -> Result<()> {
        if self.graph.pool_size == 0 {
            return Err(Error::config("graph.pool_size must be at least 1"));
        }
        if self.vector.collection.trim().is_empty() {
            return Err(Error::config("vector.collection must not be empty"));
        }
        if self.vector.dimension == 0 {
            return Err(Error::config("vector.dimension must be at least 1"));
        }
        if self.retrieval.k == 0 {
            return Err(Error::config("retrieval.k must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.ingest.similarity_threshold) {
            return Err(Error::config(
                "ingest.similarity_threshold must be within [0, 1]",
            ));
        }
        if self.ingest.embed_batch_size == 0 {
            return Err(Error::config("ingest.embed_batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// Graph store (SQLite + FTS5) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Database file
    pub db_path: PathBuf,
    /// Maximum number of pooled connections
    pub pool_size: usize,
    /// How long a caller waits for a free connection
    pub acquire_timeout_ms: u64,
    /// SQLite busy timeout for concurrent writers
    pub busy_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("strata_graph.db"),
            pool_size: 4,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 5_000,
        }
    }
}

impl GraphConfig {
    /// Pool acquisition timeout
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// SQLite busy timeout
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Vector store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Collection name
    pub collection: String,
    /// Persistence file (in-memory only when unset)
    pub path: Option<PathBuf>,
    /// Embedding dimension
    pub dimension: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            collection: "strata".to_string(),
            path: None,
            dimension: 384,
        }
    }
}

/// Query-time pipeline options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Graph hits must score strictly above this
    pub min_graph_score: f64,
    /// Prepend graph hits to the context verbatim
    pub include_direct_graph_snippets: bool,
    /// Upper bound on graph hits taken verbatim
    pub max_direct_graph_snippets: usize,
    /// How many full-text hits to request from the graph store
    pub graph_candidates: usize,
    /// Vector results kept before reranking
    pub k: usize,
    /// Passages kept after reranking
    pub rerank_top: usize,
    /// Timeout applied to every external call
    pub stage_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_graph_score: 0.0,
            include_direct_graph_snippets: true,
            max_direct_graph_snippets: 5,
            graph_candidates: 50,
            k: 10,
            rerank_top: 5,
            stage_timeout_ms: 10_000,
        }
    }
}

impl RetrievalConfig {
    /// Per-stage timeout
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Cosine similarity needed for a SIMILAR_TO edge
    pub similarity_threshold: f32,
    /// Texts per embedding request
    pub embed_batch_size: usize,
    /// Characters of content mixed into leaf-like node hashes
    pub excerpt_chars: usize,
    /// Persisted hash registry for multi-run consistency
    pub registry_path: Option<PathBuf>,
    /// Compute SIMILAR_TO edges after loading
    pub link_similar: bool,
    /// Retry policy for store writes
    pub retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            embed_batch_size: 32,
            excerpt_chars: 200,
            registry_path: None,
            link_similar: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log directory
    pub directory: String,
    /// Log file prefix
    pub filename_prefix: String,
    /// Default level when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            filename_prefix: "strata.log".to_string(),
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StrataConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.k, 10);
        assert_eq!(config.retrieval.rerank_top, 5);
        assert!((config.ingest.similarity_threshold - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
graph:
  db_path: /tmp/graph.db
  pool_size: 8
retrieval:
  min_graph_score: 5.0
  include_direct_graph_snippets: false
  k: 20
"#;
        let config = StrataConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.graph.pool_size, 8);
        assert_eq!(config.graph.acquire_timeout_ms, 5_000);
        assert_eq!(config.retrieval.k, 20);
        assert_eq!(config.retrieval.rerank_top, 5);
        assert!(!config.retrieval.include_direct_graph_snippets);
        assert!((config.retrieval.min_graph_score - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = StrataConfig::from_yaml_str("graph:\n  pool_size: 0\n");
        assert!(matches!(result, Err(Error::Config(_))));

        let result = StrataConfig::from_yaml_str("ingest:\n  similarity_threshold: 1.5\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.yaml");
        std::fs::write(&path, "vector:\n  collection: handbook\n  dimension: 64\n").unwrap();

        let config = StrataConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.vector.collection, "handbook");
        assert_eq!(config.vector.dimension, 64);

        assert!(StrataConfig::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }
}
