//! Graph store: hierarchy nodes, CONTAINS / SIMILAR_TO edges and a
//! full-text index over `(title, content)` for all four labels
//!
//! The SQLite implementation keeps nodes unique per `(label, hash)`, edges
//! unique per `(from, to, type)`, and an FTS5 external-content index in sync
//! through triggers. All access goes through the bounded `GraphPool`.

use crate::error::Result;
use crate::pool::GraphPool;
use crate::record::Level;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strata_core::config::GraphConfig;
use tracing::{debug, info};

/// Identity of a graph node: label plus hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub level: Level,
    pub hash: String,
}

impl NodeKey {
    pub fn new(level: Level, hash: impl Into<String>) -> Self {
        Self {
            level,
            hash: hash.into(),
        }
    }
}

/// A node as stored in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub level: Level,
    pub hash: String,
    pub title: String,
    pub number: String,
    pub content: String,
    pub page_number: Option<u32>,
    pub category: Option<String>,
}

impl GraphNode {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.level, self.hash.clone())
    }
}

/// Relationship types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelType {
    /// Parent -> child
    Contains,
    /// Same-level similarity, carries a score
    SimilarTo,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::SimilarTo => "SIMILAR_TO",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeKey,
    pub to: NodeKey,
    pub rel: RelType,
    pub score: Option<f32>,
    pub content: Option<String>,
}

impl GraphEdge {
    pub fn contains(parent: NodeKey, child: NodeKey) -> Self {
        Self {
            from: parent,
            to: child,
            rel: RelType::Contains,
            score: None,
            content: None,
        }
    }

    pub fn similar(a: NodeKey, b: NodeKey, score: f32) -> Self {
        Self {
            from: a,
            to: b,
            rel: RelType::SimilarTo,
            score: Some(score),
            content: None,
        }
    }
}

/// Nodes and edges written in one transaction
#[derive(Debug, Clone, Default)]
pub struct GraphBatch {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Counts written by a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub nodes_created: usize,
    pub nodes_existing: usize,
    /// Edges inserted or updated
    pub edges_written: usize,
    /// Subset of `edges_written` that did not exist before
    pub edges_created: usize,
    /// Edges with a missing endpoint
    pub edges_skipped: usize,
}

/// One full-text hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphHit {
    pub node: GraphNode,
    /// Higher is more relevant
    pub score: f64,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: BTreeMap<Level, usize>,
    pub contains_edges: usize,
    pub similar_edges: usize,
}

/// Graph backend contract
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert a node unless `(label, hash)` already exists; existing
    /// properties are never rewritten. Returns `true` if created.
    async fn upsert_node(&self, node: GraphNode) -> Result<bool>;

    /// Merge an edge by its endpoints and type, setting `score`/`content`
    /// when supplied. Returns `false` if an endpoint does not exist.
    async fn upsert_edge(&self, edge: GraphEdge) -> Result<bool>;

    /// Write many nodes and edges in one transaction
    async fn upsert_batch(&self, batch: GraphBatch) -> Result<BatchOutcome>;

    async fn node_exists(&self, key: NodeKey) -> Result<bool>;

    /// Fuzzy full-text search over `(title, content)` across all labels,
    /// best first
    async fn full_text_search(&self, query: &str, limit: usize) -> Result<Vec<GraphHit>>;

    async fn nodes_at_level(&self, level: Level) -> Result<Vec<GraphNode>>;

    async fn edges_of_type(&self, rel: RelType) -> Result<Vec<GraphEdge>>;

    async fn stats(&self) -> Result<GraphStats>;
}

/// SQLite + FTS5 graph store
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: GraphPool,
}

impl SqliteGraphStore {
    /// Open (or create) the store and its schema
    pub async fn open(config: &GraphConfig) -> Result<Self> {
        info!("Opening graph store at: {:?}", config.db_path);

        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = GraphPool::new(
            config.db_path.clone(),
            config.pool_size,
            config.acquire_timeout(),
            config.busy_timeout(),
        );
        pool.run(|conn| init_schema(conn)).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &GraphPool {
        &self.pool
    }
}

fn init_schema(conn: &mut Connection) -> Result<()> {
    debug!("Initializing graph schema");

    // WAL lets readers proceed while ingestion writes
    conn.execute_batch("PRAGMA journal_mode = WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL,
            hash TEXT NOT NULL,
            title TEXT NOT NULL,
            number TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            page_number INTEGER,
            category TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(label, hash)
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);

        CREATE TABLE IF NOT EXISTS edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_id INTEGER NOT NULL REFERENCES nodes(id),
            to_id INTEGER NOT NULL REFERENCES nodes(id),
            rel_type TEXT NOT NULL,
            score REAL,
            content TEXT,
            UNIQUE(from_id, to_id, rel_type)
        );

        CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(rel_type);",
    )?;

    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
            title, content,
            content='nodes', content_rowid='id',
            tokenize='porter unicode61'
        )",
    )?;

    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS nodes_ai AFTER INSERT ON nodes
        BEGIN
            INSERT INTO nodes_fts(rowid, title, content)
            VALUES (new.id, new.title, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS nodes_ad AFTER DELETE ON nodes
        BEGIN
            INSERT INTO nodes_fts(nodes_fts, rowid, title, content)
            VALUES ('delete', old.id, old.title, old.content);
        END;",
    )?;

    info!("Graph schema initialized successfully");
    Ok(())
}

/// Turn free text into an FTS5 prefix query: every word becomes `"word"*`,
/// words are OR-ed. Returns `None` when the text has no searchable words.
pub fn fuzzy_fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"*", w.to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn insert_node(conn: &Connection, node: &GraphNode, now: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO nodes
            (label, hash, title, number, content, page_number, category, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            node.level.label(),
            node.hash,
            node.title,
            node.number,
            node.content,
            node.page_number,
            node.category,
            now
        ],
    )?;
    Ok(inserted > 0)
}

fn node_id(conn: &Connection, key: &NodeKey) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM nodes WHERE label = ? AND hash = ?",
            params![key.level.label(), key.hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Result of writing one edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeWrite {
    Created,
    Updated,
    MissingEndpoint,
}

fn write_edge(conn: &Connection, edge: &GraphEdge) -> Result<EdgeWrite> {
    let (Some(from_id), Some(to_id)) = (node_id(conn, &edge.from)?, node_id(conn, &edge.to)?)
    else {
        debug!(
            rel = %edge.rel,
            from = %edge.from.hash,
            to = %edge.to.hash,
            "Edge endpoint missing, skipping"
        );
        return Ok(EdgeWrite::MissingEndpoint);
    };

    let existed = conn
        .query_row(
            "SELECT 1 FROM edges WHERE from_id = ? AND to_id = ? AND rel_type = ?",
            params![from_id, to_id, edge.rel.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    conn.execute(
        "INSERT INTO edges (from_id, to_id, rel_type, score, content)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(from_id, to_id, rel_type) DO UPDATE SET
            score = COALESCE(excluded.score, edges.score),
            content = COALESCE(excluded.content, edges.content)",
        params![from_id, to_id, edge.rel.as_str(), edge.score, edge.content],
    )?;
    Ok(if existed {
        EdgeWrite::Updated
    } else {
        EdgeWrite::Created
    })
}

fn parse_level(row: &Row<'_>, idx: usize) -> rusqlite::Result<Level> {
    let label: String = row.get(idx)?;
    Level::from_label(&label).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown label '{}'", label).into(),
        )
    })
}

const NODE_COLUMNS: &str =
    "n.label, n.hash, n.title, n.number, n.content, n.page_number, n.category";

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<GraphNode> {
    Ok(GraphNode {
        level: parse_level(row, 0)?,
        hash: row.get(1)?,
        title: row.get(2)?,
        number: row.get(3)?,
        content: row.get(4)?,
        page_number: row.get(5)?,
        category: row.get(6)?,
    })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<bool> {
        self.pool
            .run(move |conn| insert_node(conn, &node, &Utc::now().to_rfc3339()))
            .await
    }

    async fn upsert_edge(&self, edge: GraphEdge) -> Result<bool> {
        self.pool
            .run(move |conn| Ok(write_edge(conn, &edge)? != EdgeWrite::MissingEndpoint))
            .await
    }

    async fn upsert_batch(&self, batch: GraphBatch) -> Result<BatchOutcome> {
        self.pool
            .run(move |conn| {
                let now = Utc::now().to_rfc3339();
                let tx = conn.transaction()?;
                let mut outcome = BatchOutcome::default();

                for node in &batch.nodes {
                    if insert_node(&tx, node, &now)? {
                        outcome.nodes_created += 1;
                    } else {
                        outcome.nodes_existing += 1;
                    }
                }
                for edge in &batch.edges {
                    match write_edge(&tx, edge)? {
                        EdgeWrite::Created => {
                            outcome.edges_written += 1;
                            outcome.edges_created += 1;
                        }
                        EdgeWrite::Updated => outcome.edges_written += 1,
                        EdgeWrite::MissingEndpoint => outcome.edges_skipped += 1,
                    }
                }

                tx.commit()?;
                Ok(outcome)
            })
            .await
    }

    async fn node_exists(&self, key: NodeKey) -> Result<bool> {
        self.pool
            .run(move |conn| Ok(node_id(conn, &key)?.is_some()))
            .await
    }

    async fn full_text_search(&self, query: &str, limit: usize) -> Result<Vec<GraphHit>> {
        let Some(fts_query) = fuzzy_fts_query(query) else {
            return Ok(Vec::new());
        };
        debug!(query = %fts_query, limit, "Graph full-text search");

        self.pool
            .run(move |conn| {
                let sql = format!(
                    "SELECT {}, bm25(nodes_fts) AS rank
                     FROM nodes_fts
                     JOIN nodes n ON n.id = nodes_fts.rowid
                     WHERE nodes_fts MATCH ?
                     ORDER BY rank
                     LIMIT ?",
                    NODE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let hits = stmt
                    .query_map(params![fts_query, limit as i64], |row| {
                        Ok(GraphHit {
                            node: row_to_node(row)?,
                            // bm25() is negative, more negative is better
                            score: row.get::<_, f64>(7)?.abs(),
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(hits)
            })
            .await
    }

    async fn nodes_at_level(&self, level: Level) -> Result<Vec<GraphNode>> {
        self.pool
            .run(move |conn| {
                let sql = format!(
                    "SELECT {} FROM nodes n WHERE n.label = ? ORDER BY n.id",
                    NODE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let nodes = stmt
                    .query_map(params![level.label()], row_to_node)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(nodes)
            })
            .await
    }

    async fn edges_of_type(&self, rel: RelType) -> Result<Vec<GraphEdge>> {
        self.pool
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.label, a.hash, b.label, b.hash, e.score, e.content
                     FROM edges e
                     JOIN nodes a ON a.id = e.from_id
                     JOIN nodes b ON b.id = e.to_id
                     WHERE e.rel_type = ?
                     ORDER BY e.id",
                )?;
                let edges = stmt
                    .query_map(params![rel.as_str()], |row| {
                        Ok(GraphEdge {
                            from: NodeKey::new(parse_level(row, 0)?, row.get::<_, String>(1)?),
                            to: NodeKey::new(parse_level(row, 2)?, row.get::<_, String>(3)?),
                            rel,
                            score: row.get(4)?,
                            content: row.get(5)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(edges)
            })
            .await
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.pool
            .run(|conn| {
                let mut stats = GraphStats::default();

                let mut stmt = conn.prepare("SELECT label, COUNT(*) FROM nodes GROUP BY label")?;
                let rows = stmt
                    .query_map([], |row| Ok((parse_level(row, 0)?, row.get::<_, i64>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                for (level, count) in rows {
                    stats.nodes.insert(level, count as usize);
                }

                let count_edges = |rel: RelType| -> Result<usize> {
                    let n: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM edges WHERE rel_type = ?",
                        params![rel.as_str()],
                        |row| row.get(0),
                    )?;
                    Ok(n as usize)
                };
                stats.contains_edges = count_edges(RelType::Contains)?;
                stats.similar_edges = count_edges(RelType::SimilarTo)?;

                Ok(stats)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteGraphStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = GraphConfig {
            db_path: temp_dir.path().join("graph.db"),
            pool_size: 2,
            ..Default::default()
        };
        let store = SqliteGraphStore::open(&config).await.unwrap();
        (store, temp_dir)
    }

    fn node(level: Level, hash: &str, title: &str, content: &str) -> GraphNode {
        GraphNode {
            level,
            hash: hash.to_string(),
            title: title.to_string(),
            number: String::new(),
            content: content.to_string(),
            page_number: None,
            category: Some("policies".to_string()),
        }
    }

    #[test]
    fn test_fuzzy_fts_query() {
        assert_eq!(
            fuzzy_fts_query("Budget, policy!").as_deref(),
            Some("\"budget\"* OR \"policy\"*")
        );
        assert_eq!(fuzzy_fts_query("  ?? "), None);
    }

    #[tokio::test]
    async fn test_upsert_node_is_idempotent() {
        let (store, _temp) = create_test_store().await;

        let first = node(Level::Chapter, "ch-1", "Budget policy", "Original text");
        assert!(store.upsert_node(first).await.unwrap());

        // Same identity, different properties: not rewritten
        let second = node(Level::Chapter, "ch-1", "Budget policy", "Changed text");
        assert!(!store.upsert_node(second).await.unwrap());

        let nodes = store.nodes_at_level(Level::Chapter).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].content, "Original text");
    }

    #[tokio::test]
    async fn test_hash_unique_per_label() {
        let (store, _temp) = create_test_store().await;

        assert!(store
            .upsert_node(node(Level::Chapter, "h", "A", ""))
            .await
            .unwrap());
        assert!(store
            .upsert_node(node(Level::Section, "h", "A", ""))
            .await
            .unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.nodes.get(&Level::Chapter), Some(&1));
        assert_eq!(stats.nodes.get(&Level::Section), Some(&1));
    }

    #[tokio::test]
    async fn test_full_text_search() {
        let (store, _temp) = create_test_store().await;
        let batch = GraphBatch {
            nodes: vec![
                node(Level::Document, "doc", "Handbook", ""),
                node(Level::Chapter, "c1", "Budget policy", "Approvals need two signatures."),
                node(Level::Chapter, "c2", "Travel policy", "Book economy fares."),
            ],
            edges: vec![],
        };
        store.upsert_batch(batch).await.unwrap();

        let hits = store.full_text_search("budget", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.hash, "c1");
        assert!(hits[0].score > 0.0);

        // Prefix matching
        let hits = store.full_text_search("budg", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits = store.full_text_search("policy", 10).await.unwrap();
        assert_eq!(hits.len(), 2);

        assert!(store.full_text_search("!!!", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edges_merge_by_endpoints() {
        let (store, _temp) = create_test_store().await;
        store.upsert_node(node(Level::Chapter, "a", "A", "")).await.unwrap();
        store.upsert_node(node(Level::Chapter, "b", "B", "")).await.unwrap();

        let a = NodeKey::new(Level::Chapter, "a");
        let b = NodeKey::new(Level::Chapter, "b");

        assert!(store
            .upsert_edge(GraphEdge::similar(a.clone(), b.clone(), 0.85))
            .await
            .unwrap());
        assert!(store
            .upsert_edge(GraphEdge::similar(a.clone(), b.clone(), 0.9))
            .await
            .unwrap());

        let edges = store.edges_of_type(RelType::SimilarTo).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].score.unwrap() - 0.9).abs() < 1e-6);

        // Missing endpoint
        let missing = NodeKey::new(Level::Chapter, "zzz");
        assert!(!store
            .upsert_edge(GraphEdge::contains(a, missing))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_batch_outcome() {
        let (store, _temp) = create_test_store().await;
        let doc = node(Level::Document, "doc", "Handbook", "");
        let ch = node(Level::Chapter, "c1", "Budget", "text");
        let batch = GraphBatch {
            edges: vec![GraphEdge::contains(doc.key(), ch.key())],
            nodes: vec![doc, ch],
        };

        let outcome = store.upsert_batch(batch.clone()).await.unwrap();
        assert_eq!(outcome.nodes_created, 2);
        assert_eq!(outcome.edges_written, 1);
        assert_eq!(outcome.edges_created, 1);

        let again = store.upsert_batch(batch).await.unwrap();
        assert_eq!(again.nodes_created, 0);
        assert_eq!(again.nodes_existing, 2);
        assert_eq!(again.edges_written, 1);
        assert_eq!(again.edges_created, 0);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.contains_edges, 1);
        assert!(store.node_exists(NodeKey::new(Level::Document, "doc")).await.unwrap());
    }
}
