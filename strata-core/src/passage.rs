//! The `Passage` value type exchanged at every ingestion and retrieval boundary
//!
//! Graph hits and vector hits are both normalized into a `Passage` once, so
//! downstream code never has to care which store produced a piece of text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Metadata key holding the node's own hash
pub const META_HASH: &str = "hash";
/// Metadata key holding the node's hierarchy level
pub const META_LEVEL: &str = "level";
/// Metadata key holding the node's title
pub const META_TITLE: &str = "title";
/// Metadata key holding the node's ordinal number
pub const META_NUMBER: &str = "number";
/// Metadata key holding the source category
pub const META_CATEGORY: &str = "category";
/// Metadata key holding the page number, if known
pub const META_PAGE: &str = "page_number";
/// Metadata key holding every ancestor hash as a JSON array
pub const META_LINEAGE: &str = "lineage";
/// Prefix shared by the per-level hash keys (`hash_document`, `hash_chapter`, ...)
pub const META_HASH_PREFIX: &str = "hash_";

/// Which store a passage came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassageSource {
    /// Taken verbatim from a graph full-text hit
    Graph,
    /// Returned by the vector store
    Vector,
}

impl PassageSource {
    /// Label used in the assembled context
    pub fn label(&self) -> &'static str {
        match self {
            Self::Graph => "graph",
            Self::Vector => "vector",
        }
    }
}

/// A piece of retrieved text plus flat metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Node hash; shared identity across both stores
    pub id: String,
    /// Text body
    pub content: String,
    /// Flat, scalar-only metadata
    pub metadata: HashMap<String, String>,
    /// Store-native relevance score, if any
    pub score: Option<f32>,
    /// Originating store
    pub source: PassageSource,
}

impl Passage {
    /// Create a passage with empty metadata
    pub fn new(id: impl Into<String>, content: impl Into<String>, source: PassageSource) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
            score: None,
            source,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach a score
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    /// Node title, if recorded
    pub fn title(&self) -> Option<&str> {
        self.metadata.get(META_TITLE).map(String::as_str)
    }

    /// The passage's own hash plus every ancestor hash found in its metadata
    pub fn lineage_hashes(&self) -> BTreeSet<String> {
        lineage_hashes(&self.id, &self.metadata)
    }
}

/// `id` plus every hash recorded under `hash`, `hash_*` or the `lineage` array
pub fn lineage_hashes(id: &str, metadata: &HashMap<String, String>) -> BTreeSet<String> {
    let mut hashes = BTreeSet::new();
    hashes.insert(id.to_string());

    for (key, value) in metadata {
        if key.starts_with(META_HASH_PREFIX) || key == META_HASH {
            hashes.insert(value.clone());
        }
    }

    if let Some(raw) = metadata.get(META_LINEAGE) {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
            hashes.extend(list);
        }
    }

    hashes
}

/// Flatten JSON metadata into scalar-compatible string values
///
/// Strings are kept as-is, numbers and booleans are stringified, nulls are
/// dropped and nested arrays/objects are encoded as compact JSON.
pub fn flatten_metadata(map: serde_json::Map<String, Value>) -> HashMap<String, String> {
    map.into_iter()
        .filter_map(|(key, value)| {
            let flat = match value {
                Value::Null => return None,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                nested @ (Value::Array(_) | Value::Object(_)) => nested.to_string(),
            };
            Some((key, flat))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_metadata() {
        let value = json!({
            "title": "Budget",
            "page_number": 12,
            "draft": false,
            "missing": null,
            "lineage": ["a", "b"],
            "extra": {"k": 1}
        });
        let Value::Object(map) = value else {
            panic!("expected object");
        };

        let flat = flatten_metadata(map);
        assert_eq!(flat.get("title").unwrap(), "Budget");
        assert_eq!(flat.get("page_number").unwrap(), "12");
        assert_eq!(flat.get("draft").unwrap(), "false");
        assert!(!flat.contains_key("missing"));
        assert_eq!(flat.get("lineage").unwrap(), r#"["a","b"]"#);
        assert_eq!(flat.get("extra").unwrap(), r#"{"k":1}"#);
    }

    #[test]
    fn test_lineage_hashes() {
        let mut metadata = HashMap::new();
        metadata.insert("hash_document".to_string(), "doc".to_string());
        metadata.insert("hash_chapter".to_string(), "ch".to_string());
        metadata.insert("title".to_string(), "not a hash".to_string());
        metadata.insert(META_LINEAGE.to_string(), r#"["doc","ch","sub1"]"#.to_string());

        let passage = Passage::new("sub2", "text", PassageSource::Vector).with_metadata(metadata);
        let hashes = passage.lineage_hashes();

        let expected: BTreeSet<String> = ["doc", "ch", "sub1", "sub2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(hashes, expected);
    }
}
