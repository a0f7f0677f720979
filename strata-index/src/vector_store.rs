//! Vector storage and similarity search
//!
//! Points are keyed by node hash, so re-indexing the same node overwrites
//! instead of duplicating. Search is exact cosine over the whole collection,
//! optionally restricted to points whose lineage intersects a hash set.

use crate::error::{IndexError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use strata_core::config::VectorConfig;
use strata_core::passage::{lineage_hashes, Passage, PassageSource};
use strata_core::rag::cosine_similarity;
use tracing::{debug, info};

/// A point to store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Node hash
    pub id: String,
    pub embedding: Vec<f32>,
    pub content: String,
    /// Flat metadata, including the ancestor hashes
    pub metadata: HashMap<String, String>,
}

/// Restrict a search to points related to a set of node hashes
///
/// A point matches when its own hash, any `hash_*` field or any `lineage`
/// entry is in the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashFilter {
    hashes: BTreeSet<String>,
}

impl HashFilter {
    pub fn new<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hashes: hashes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn hashes(&self) -> &BTreeSet<String> {
        &self.hashes
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        lineage_hashes(&record.id, &record.metadata)
            .iter()
            .any(|h| self.hashes.contains(h))
    }
}

/// Vector backend contract
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Collection served by this store
    fn collection(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Fail with `CollectionNotFound` unless `name` is served
    async fn ensure_collection(&self, name: &str) -> Result<()> {
        if self.has_collection(name).await? {
            Ok(())
        } else {
            Err(IndexError::CollectionNotFound(name.to_string()))
        }
    }

    /// Insert or overwrite points by id. Returns how many ids were new.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize>;

    /// Subset of `ids` already stored
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Top `k` points by cosine similarity, best first
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&HashFilter>,
    ) -> Result<Vec<Passage>>;

    async fn count(&self) -> Result<usize>;

    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(!self.existing_ids(&[id.to_string()]).await?.is_empty())
    }
}

/// In-process flat index with optional bincode persistence
pub struct FlatVectorStore {
    collection: String,
    dimension: usize,
    path: Option<PathBuf>,
    points: RwLock<HashMap<String, VectorRecord>>,
    dirty: AtomicBool,
}

#[derive(Serialize, Deserialize)]
struct VectorStoreData {
    collection: String,
    dimension: usize,
    points: Vec<VectorRecord>,
}

impl FlatVectorStore {
    /// Empty in-memory store
    pub fn new(collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            collection: collection.into(),
            dimension,
            path: None,
            points: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Store described by the config; loads the persisted file if present
    pub fn open(config: &VectorConfig) -> Result<Self> {
        let Some(path) = &config.path else {
            return Ok(Self::new(config.collection.clone(), config.dimension));
        };

        if !path.exists() {
            info!("Creating vector collection '{}' at {:?}", config.collection, path);
            let mut store = Self::new(config.collection.clone(), config.dimension);
            store.path = Some(path.clone());
            return Ok(store);
        }

        let mut store = Self::load(path)?;
        if store.collection != config.collection {
            return Err(IndexError::CollectionNotFound(format!(
                "{} (file {:?} holds '{}')",
                config.collection, path, store.collection
            )));
        }
        if store.dimension != config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: config.dimension,
                actual: store.dimension,
            });
        }
        store.path = Some(path.clone());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Persist to the configured path, if any and if changed
    pub fn flush(&self) -> Result<()> {
        match &self.path {
            Some(path) if self.is_dirty() => self.save(path),
            _ => Ok(()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = VectorStoreData {
            collection: self.collection.clone(),
            dimension: self.dimension,
            points: self.points.read().values().cloned().collect(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("tmp");
        {
            let file = std::fs::File::create(&tmp_path)?;
            let writer = std::io::BufWriter::new(file);
            bincode::serialize_into(writer, &data)?;
        }
        std::fs::rename(tmp_path, path)?;

        self.dirty.store(false, Ordering::Release);
        debug!("Saved {} vectors to {:?}", data.points.len(), path);
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let reader = std::io::BufReader::new(file);
        let data: VectorStoreData = bincode::deserialize_from(reader)?;

        let store = Self::new(data.collection, data.dimension);
        {
            let mut points = store.points.write();
            for point in data.points {
                points.insert(point.id.clone(), point);
            }
        }
        info!(
            "Loaded {} vectors for collection '{}'",
            store.len(),
            store.collection
        );
        Ok(store)
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

fn to_passage(record: &VectorRecord, score: f32) -> Passage {
    Passage::new(record.id.clone(), record.content.clone(), PassageSource::Vector)
        .with_metadata(record.metadata.clone())
        .with_score(score)
}

#[async_trait]
impl VectorStore for FlatVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collection == name)
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize> {
        for record in &records {
            self.check_dimension(record.embedding.len())?;
        }

        let mut points = self.points.write();
        let mut created = 0;
        for record in records {
            if points.insert(record.id.clone(), record).is_none() {
                created += 1;
            }
        }
        self.dirty.store(true, Ordering::Release);
        Ok(created)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let points = self.points.read();
        Ok(ids
            .iter()
            .filter(|id| points.contains_key(id.as_str()))
            .cloned()
            .collect())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&HashFilter>,
    ) -> Result<Vec<Passage>> {
        self.check_dimension(query.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let points = self.points.read();
        let mut scored: Vec<(&VectorRecord, f32)> = points
            .values()
            .filter(|record| filter.map_or(true, |f| f.matches(record)))
            .map(|record| (record, cosine_similarity(query, &record.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(record, score)| to_passage(record, score))
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::passage::{META_HASH_PREFIX, META_LINEAGE};

    fn record(id: &str, embedding: Vec<f32>, parent: Option<&str>) -> VectorRecord {
        let mut metadata = HashMap::new();
        if let Some(parent) = parent {
            metadata.insert(format!("{}chapter", META_HASH_PREFIX), parent.to_string());
            metadata.insert(META_LINEAGE.to_string(), format!("[\"{}\"]", parent));
        }
        VectorRecord {
            id: id.to_string(),
            embedding,
            content: format!("content of {}", id),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = FlatVectorStore::new("test", 3);
        let created = store
            .upsert(vec![record("a", vec![1.0, 0.0, 0.0], None)])
            .await
            .unwrap();
        assert_eq!(created, 1);

        let created = store
            .upsert(vec![record("a", vec![0.0, 1.0, 0.0], None)])
            .await
            .unwrap();
        assert_eq!(created, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = FlatVectorStore::new("test", 3);
        store
            .upsert(vec![
                record("x", vec![1.0, 0.0, 0.0], None),
                record("y", vec![0.0, 1.0, 0.0], None),
                record("xy", vec![0.7, 0.7, 0.0], None),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.1, 0.0], 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "x");
        assert_eq!(results[1].id, "xy");
        assert_eq!(results[0].source, PassageSource::Vector);
        assert!(results[0].score.unwrap() >= results[1].score.unwrap());
    }

    #[tokio::test]
    async fn test_filter_matches_lineage() {
        let store = FlatVectorStore::new("test", 2);
        store
            .upsert(vec![
                record("s1", vec![1.0, 0.0], Some("c1")),
                record("s2", vec![1.0, 0.0], Some("c2")),
                record("c1", vec![0.0, 1.0], None),
            ])
            .await
            .unwrap();

        let filter = HashFilter::new(["c1"]);
        let results = store.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        let ids: Vec<_> = results.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "c1"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let store = FlatVectorStore::new("test", 3);
        let err = store
            .upsert(vec![record("a", vec![1.0], None)])
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        let err = store.search(&[1.0, 0.0], 5, None).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 3, actual: 2 }
        ));
    }

    #[tokio::test]
    async fn test_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let config = VectorConfig {
            collection: "docs".to_string(),
            path: Some(path.clone()),
            dimension: 2,
        };

        let store = FlatVectorStore::open(&config).unwrap();
        store
            .upsert(vec![record("a", vec![1.0, 0.0], Some("p"))])
            .await
            .unwrap();
        assert!(store.is_dirty());
        store.flush().unwrap();
        assert!(!store.is_dirty());

        let reopened = FlatVectorStore::open(&config).unwrap();
        assert_eq!(reopened.len(), 1);
        let existing = reopened
            .existing_ids(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(existing.contains("a"));
        assert!(!existing.contains("b"));

        let wrong = VectorConfig {
            collection: "other".to_string(),
            ..config
        };
        assert!(matches!(
            FlatVectorStore::open(&wrong),
            Err(IndexError::CollectionNotFound(_))
        ));
    }
}
