//! Content identity: deterministic node hashes and the hash registry
//!
//! A node's hash is a pure function of `(parent hash, title, number, excerpt)`
//! and is the shared primary key in both the graph store and the vector
//! store. The `HashRegistry` remembers the hash assigned to each natural key
//! (`parent|title|number`, plus the excerpt for sections and subsections) so
//! the same logical node found in several export files resolves to one
//! identity, first-seen wins.

use crate::error::Result;
use crate::record::{Corpus, HierNode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Separates the hashed fields so `("ab", "c")` and `("a", "bc")` differ
const FIELD_SEPARATOR: u8 = 0x1f;

/// Compute the hash of a hierarchical node
pub fn compute_hash(
    parent_hash: Option<&str>,
    title: &str,
    number: &str,
    content_excerpt: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent_hash.unwrap_or_default().as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(title.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(number.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(content_excerpt.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// First `max_chars` characters of the trimmed content
pub fn excerpt(content: &str, max_chars: usize) -> String {
    content.trim().chars().take(max_chars).collect()
}

/// Registry key of a node: `parent|title|number`, with `|excerpt` appended
/// when the node's hash covers its content
pub fn natural_key(
    parent_hash: Option<&str>,
    title: &str,
    number: &str,
    content_excerpt: Option<&str>,
) -> String {
    let mut key = format!("{}|{}|{}", parent_hash.unwrap_or_default(), title, number);
    if let Some(excerpt) = content_excerpt {
        key.push('|');
        key.push_str(excerpt);
    }
    key
}

/// Excerpt hashed for `node`: sections and subsections only
fn node_excerpt(node: &HierNode, excerpt_chars: usize) -> Option<String> {
    node.level
        .is_leaf_like()
        .then(|| excerpt(&node.content, excerpt_chars))
}

fn node_key(node: &HierNode, parent_hash: Option<&str>, excerpt_chars: usize) -> String {
    natural_key(
        parent_hash,
        &node.title,
        &node.number,
        node_excerpt(node, excerpt_chars).as_deref(),
    )
}

/// Same natural key, two different pre-existing hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConflict {
    pub key: String,
    /// First-seen hash, kept as authoritative
    pub kept: String,
    /// Later hash, replaced on the node
    pub rejected: String,
}

/// What `ensure_hash` did to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOutcome {
    /// Node carried a hash; it is now known to the registry
    Recorded,
    /// Node had no hash; a previously assigned one was reused
    Reused,
    /// Node had no hash and none was known; a fresh digest was computed
    Assigned,
    /// Node carried a hash that disagrees with the registry
    Conflict(IdentityConflict),
}

/// Natural key -> hash, for one ingestion run or persisted across runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashRegistry {
    entries: BTreeMap<String, String>,
}

impl HashRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted registry; a missing file yields an empty one
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No registry at {:?}, starting empty", path);
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let registry: Self = serde_json::from_str(&content)?;
        info!("Loaded hash registry with {} entries from {:?}", registry.len(), path);
        Ok(registry)
    }

    /// Persist atomically (write temp file, then rename)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(tmp_path, path)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `hash` under `key` unless a different hash is already there
    pub fn record(&mut self, key: &str, hash: &str) -> std::result::Result<(), IdentityConflict> {
        match self.entries.get(key) {
            Some(existing) if existing != hash => Err(IdentityConflict {
                key: key.to_string(),
                kept: existing.clone(),
                rejected: hash.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(key.to_string(), hash.to_string());
                Ok(())
            }
        }
    }
}

/// Make sure `node` carries a hash, consulting and updating the registry
///
/// A conflicting node is rewritten to the first-seen hash so both records
/// resolve to one identity; the conflict is returned for review.
pub fn ensure_hash(
    node: &mut HierNode,
    parent_hash: Option<&str>,
    registry: &mut HashRegistry,
    excerpt_chars: usize,
) -> HashOutcome {
    let key = node_key(node, parent_hash, excerpt_chars);

    if let Some(hash) = node.hash.as_deref() {
        return match registry.record(&key, hash) {
            Ok(()) => HashOutcome::Recorded,
            Err(conflict) => {
                warn!(
                    key = %conflict.key,
                    kept = %conflict.kept,
                    rejected = %conflict.rejected,
                    "Identity conflict, keeping first-seen hash"
                );
                node.hash = Some(conflict.kept.clone());
                HashOutcome::Conflict(conflict)
            }
        };
    }

    if let Some(existing) = registry.get(&key) {
        node.hash = Some(existing.to_string());
        return HashOutcome::Reused;
    }

    let content_excerpt = node_excerpt(node, excerpt_chars);
    let hash = compute_hash(
        parent_hash,
        &node.title,
        &node.number,
        content_excerpt.as_deref(),
    );
    // Key was absent, so this cannot conflict
    let _ = registry.record(&key, &hash);
    node.hash = Some(hash);
    HashOutcome::Assigned
}

/// Counters from one identity pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityReport {
    pub recorded: usize,
    pub reused: usize,
    pub assigned: usize,
    pub relabelled: usize,
    pub conflicts: Vec<IdentityConflict>,
    /// Natural keys met more than once in one pass; those nodes share a hash
    #[serde(default)]
    pub duplicates: Vec<String>,
}

impl IdentityReport {
    pub fn merge(&mut self, other: IdentityReport) {
        self.recorded += other.recorded;
        self.reused += other.reused;
        self.assigned += other.assigned;
        self.relabelled += other.relabelled;
        self.conflicts.extend(other.conflicts);
        self.duplicates.extend(other.duplicates);
    }
}

/// Backfills hashes over a whole corpus
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    excerpt_chars: usize,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self { excerpt_chars: 200 }
    }
}

impl IdentityResolver {
    pub fn new(excerpt_chars: usize) -> Self {
        Self { excerpt_chars }
    }

    /// Give every node in `corpus` a hash, parents before children
    pub fn resolve_corpus(&self, corpus: &mut Corpus, registry: &mut HashRegistry) -> IdentityReport {
        let mut report = IdentityReport {
            relabelled: corpus.relabelled_fields,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for category in &mut corpus.categories {
            for doc in &mut category.documents {
                self.resolve_node(doc, None, registry, &mut seen, &mut report);
            }
        }

        info!(
            recorded = report.recorded,
            reused = report.reused,
            assigned = report.assigned,
            conflicts = report.conflicts.len(),
            duplicates = report.duplicates.len(),
            "Identity pass complete"
        );
        report
    }

    fn resolve_node(
        &self,
        node: &mut HierNode,
        parent_hash: Option<&str>,
        registry: &mut HashRegistry,
        seen: &mut HashSet<String>,
        report: &mut IdentityReport,
    ) {
        let key = node_key(node, parent_hash, self.excerpt_chars);
        if !seen.insert(key.clone()) {
            warn!(key = %key, "Duplicate node in one corpus, records will share a hash");
            report.duplicates.push(key);
        }

        match ensure_hash(node, parent_hash, registry, self.excerpt_chars) {
            HashOutcome::Recorded => report.recorded += 1,
            HashOutcome::Reused => report.reused += 1,
            HashOutcome::Assigned => report.assigned += 1,
            HashOutcome::Conflict(conflict) => report.conflicts.push(conflict),
        }

        let own_hash = node.hash.clone();
        for child in &mut node.children {
            self.resolve_node(child, own_hash.as_deref(), registry, seen, report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;

    #[test]
    fn test_compute_hash_deterministic() {
        let a = compute_hash(Some("parent"), "Budget", "1", None);
        let b = compute_hash(Some("parent"), "Budget", "1", None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        // Known value pins the encoding across releases
        assert_eq!(
            compute_hash(None, "", "", None),
            hex::encode(Sha256::digest([FIELD_SEPARATOR; 3]))
        );
    }

    #[test]
    fn test_compute_hash_field_boundaries() {
        let a = compute_hash(None, "ab", "c", None);
        let b = compute_hash(None, "a", "bc", None);
        assert_ne!(a, b);

        let with_parent = compute_hash(Some("p"), "t", "1", None);
        let without_parent = compute_hash(None, "t", "1", None);
        assert_ne!(with_parent, without_parent);
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("  héllo world  ", 5), "héllo");
        assert_eq!(excerpt("short", 100), "short");
    }

    #[test]
    fn test_ensure_hash_records_existing() {
        let mut registry = HashRegistry::new();
        let mut node = HierNode::new(Level::Document, "Handbook").with_hash("doc-1");

        assert_eq!(ensure_hash(&mut node, None, &mut registry, 200), HashOutcome::Recorded);
        assert_eq!(registry.get("|Handbook|"), Some("doc-1"));
    }

    #[test]
    fn test_ensure_hash_reuses_registry() {
        let mut registry = HashRegistry::new();
        let mut primary = HierNode::new(Level::Document, "Handbook").with_hash("doc-1");
        ensure_hash(&mut primary, None, &mut registry, 200);

        // Same document found in a shard file without a hash
        let mut shard = HierNode::new(Level::Document, "Handbook");
        assert_eq!(ensure_hash(&mut shard, None, &mut registry, 200), HashOutcome::Reused);
        assert_eq!(shard.hash.as_deref(), Some("doc-1"));
    }

    #[test]
    fn test_ensure_hash_assigns_fresh() {
        let mut registry = HashRegistry::new();
        let mut node = HierNode::new(Level::Section, "Limits")
            .with_number("1.1")
            .with_content("Limits per department.");

        assert_eq!(
            ensure_hash(&mut node, Some("ch-1"), &mut registry, 200),
            HashOutcome::Assigned
        );
        let expected = compute_hash(Some("ch-1"), "Limits", "1.1", Some("Limits per department."));
        assert_eq!(node.hash.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_conflict_keeps_first_seen() {
        let mut registry = HashRegistry::new();
        let mut first = HierNode::new(Level::Document, "Handbook").with_hash("doc-1");
        ensure_hash(&mut first, None, &mut registry, 200);

        let mut second = HierNode::new(Level::Document, "Handbook").with_hash("doc-2");
        let outcome = ensure_hash(&mut second, None, &mut registry, 200);

        assert_eq!(
            outcome,
            HashOutcome::Conflict(IdentityConflict {
                key: "|Handbook|".to_string(),
                kept: "doc-1".to_string(),
                rejected: "doc-2".to_string(),
            })
        );
        assert_eq!(second.hash.as_deref(), Some("doc-1"));
        assert_eq!(registry.get("|Handbook|"), Some("doc-1"));
    }

    #[test]
    fn test_cross_shard_consistency() {
        let primary = r#"{ "policies": { "handbook.pdf": {
            "title": "Handbook", "hash_document": "doc-primary",
            "chapters": [ { "title": "Budget", "number": "1", "content": "Budget rules" } ]
        } } }"#;
        let shard = r#"{ "policies": { "handbook_part2.pdf": {
            "title": "Handbook",
            "chapters": [ { "title": "Budget", "number": "1", "content": "Budget rules" } ]
        } } }"#;

        let resolver = IdentityResolver::default();
        let mut registry = HashRegistry::new();

        let mut a = Corpus::from_json_str(primary).unwrap();
        let mut b = Corpus::from_json_str(shard).unwrap();
        resolver.resolve_corpus(&mut a, &mut registry);
        let report = resolver.resolve_corpus(&mut b, &mut registry);

        let doc_a = &a.categories[0].documents[0];
        let doc_b = &b.categories[0].documents[0];
        assert_eq!(doc_a.hash.as_deref(), Some("doc-primary"));
        assert_eq!(doc_b.hash, doc_a.hash);
        assert_eq!(doc_b.children[0].hash, doc_a.children[0].hash);
        assert_eq!(report.reused, 2);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_same_titled_sections_keep_distinct_hashes() {
        let json = r#"{ "policies": { "handbook.pdf": {
            "title": "Handbook", "hash_document": "doc-1",
            "chapters": [ { "title": "Budget", "number": "1", "sections": [
                { "title": "Note", "number": "", "content": "Receipts are kept for five years." },
                { "title": "Note", "number": "", "content": "Cash advances need a form." }
            ] } ]
        } } }"#;

        let resolver = IdentityResolver::default();
        let mut registry = HashRegistry::new();
        let mut corpus = Corpus::from_json_str(json).unwrap();
        let report = resolver.resolve_corpus(&mut corpus, &mut registry);

        let sections = &corpus.categories[0].documents[0].children[0].children;
        assert_ne!(sections[0].hash, sections[1].hash);
        assert_eq!(report.assigned, 3);
        assert_eq!(report.reused, 0);
        assert!(report.conflicts.is_empty());
        assert!(report.duplicates.is_empty());

        // A later shard with the same notes resolves to the same hashes
        let mut again = Corpus::from_json_str(json).unwrap();
        let report = resolver.resolve_corpus(&mut again, &mut registry);
        assert_eq!(report.reused, 3);
        assert_eq!(
            again.categories[0].documents[0].children[0].children[1].hash,
            sections[1].hash
        );
    }

    #[test]
    fn test_identical_siblings_reported_as_duplicates() {
        let json = r#"{ "policies": { "handbook.pdf": {
            "title": "Handbook", "hash_document": "doc-1",
            "chapters": [ { "title": "Budget", "number": "1", "sections": [
                { "title": "Note", "number": "", "content": "Same text." },
                { "title": "Note", "number": "", "content": "Same text." }
            ] } ]
        } } }"#;

        let mut corpus = Corpus::from_json_str(json).unwrap();
        let report = IdentityResolver::default().resolve_corpus(&mut corpus, &mut HashRegistry::new());

        assert_eq!(report.duplicates.len(), 1);
        assert!(report.duplicates[0].ends_with("|Note||Same text."));
    }

    #[test]
    fn test_section_key_includes_excerpt() {
        let mut registry = HashRegistry::new();
        let mut first = HierNode::new(Level::Section, "Note").with_content("First.");
        let mut second = HierNode::new(Level::Section, "Note").with_content("Second.");

        assert_eq!(ensure_hash(&mut first, Some("ch"), &mut registry, 200), HashOutcome::Assigned);
        assert_eq!(ensure_hash(&mut second, Some("ch"), &mut registry, 200), HashOutcome::Assigned);
        assert_ne!(first.hash, second.hash);
        assert_eq!(registry.get("ch|Note||First."), first.hash.as_deref());
    }

    #[test]
    fn test_registry_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = HashRegistry::new();
        registry.record("|Handbook|", "doc-1").unwrap();
        registry.save(&path).unwrap();

        let loaded = HashRegistry::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("|Handbook|"), Some("doc-1"));

        let empty = HashRegistry::load(dir.path().join("missing.json")).unwrap();
        assert!(empty.is_empty());
    }
}
