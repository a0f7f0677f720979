//! Hierarchical corpus records produced by the upstream document parser
//!
//! The export format nests `category -> document name -> document`, and each
//! document carries `chapters`, each chapter `sections`, each section
//! `sublevels` (recursively). Records are read from raw JSON so that
//! mislabelled hash fields can be corrected in place before conversion.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Hierarchy level of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Document,
    Chapter,
    Section,
    Subsection,
}

impl Level {
    pub const ALL: [Level; 4] = [
        Level::Document,
        Level::Chapter,
        Level::Section,
        Level::Subsection,
    ];

    /// Graph label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Chapter => "Chapter",
            Self::Section => "Section",
            Self::Subsection => "Subsection",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.label() == label)
    }

    /// Lowercase name used in metadata keys
    pub fn key(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Chapter => "chapter",
            Self::Section => "section",
            Self::Subsection => "subsection",
        }
    }

    /// Record field carrying this level's hash
    pub fn hash_field(&self) -> &'static str {
        match self {
            Self::Document => "hash_document",
            Self::Chapter => "hash_chapter",
            Self::Section => "hash_section",
            Self::Subsection => "hash_subsection",
        }
    }

    /// Record field listing this level's children
    pub fn children_field(&self) -> &'static str {
        match self {
            Self::Document => "chapters",
            Self::Chapter => "sections",
            Self::Section | Self::Subsection => "sublevels",
        }
    }

    /// Level of this node's children
    pub fn child(&self) -> Level {
        match self {
            Self::Document => Self::Chapter,
            Self::Chapter => Self::Section,
            Self::Section | Self::Subsection => Self::Subsection,
        }
    }

    /// Leaf-like nodes mix a content excerpt into their hash
    pub fn is_leaf_like(&self) -> bool {
        matches!(self, Self::Section | Self::Subsection)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One node of the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierNode {
    pub level: Level,
    pub title: String,
    pub number: String,
    pub content: String,
    pub page_number: Option<u32>,
    /// Missing until the identity pass has run
    pub hash: Option<String>,
    pub children: Vec<HierNode>,
}

impl HierNode {
    pub fn new(level: Level, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            number: String::new(),
            content: String::new(),
            page_number: None,
            hash: None,
            children: Vec::new(),
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = number.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_child(mut self, child: HierNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Number of nodes in this subtree, including self
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(HierNode::count).sum::<usize>()
    }
}

/// All documents exported under one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecords {
    pub name: String,
    pub documents: Vec<HierNode>,
}

/// A parsed export (one file or shard)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub categories: Vec<CategoryRecords>,
    /// Hash fields renamed to their level's expected name while parsing
    pub relabelled_fields: usize,
}

impl Corpus {
    /// Parse the parser export format
    pub fn from_value(mut value: Value) -> Result<Self> {
        let root = value
            .as_object_mut()
            .ok_or_else(|| IndexError::InvalidRecord("corpus root must be an object".into()))?;

        let mut corpus = Corpus::default();
        for (category, docs) in root.iter_mut() {
            let docs = docs.as_object_mut().ok_or_else(|| {
                IndexError::InvalidRecord(format!("category '{}' must be an object", category))
            })?;

            let mut documents = Vec::with_capacity(docs.len());
            for (doc_name, doc) in docs.iter_mut() {
                let node = parse_node(
                    doc,
                    Level::Document,
                    Some(doc_name.as_str()),
                    &[],
                    &mut corpus.relabelled_fields,
                )?;
                documents.push(node);
            }

            corpus.categories.push(CategoryRecords {
                name: category.clone(),
                documents,
            });
        }

        debug!(
            categories = corpus.categories.len(),
            nodes = corpus.node_count(),
            relabelled = corpus.relabelled_fields,
            "Parsed corpus"
        );
        Ok(corpus)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Load one export file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn node_count(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| c.documents.iter())
            .map(HierNode::count)
            .sum()
    }

    /// Visit every node depth-first with its category and ancestor chain
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &[&HierNode], &HierNode),
    {
        fn go<'a, F>(
            category: &str,
            ancestors: &mut Vec<&'a HierNode>,
            node: &'a HierNode,
            visit: &mut F,
        ) where
            F: FnMut(&str, &[&HierNode], &HierNode),
        {
            visit(category, ancestors.as_slice(), node);
            ancestors.push(node);
            for child in &node.children {
                go(category, ancestors, child, visit);
            }
            ancestors.pop();
        }

        for category in &self.categories {
            for doc in &category.documents {
                let mut ancestors = Vec::new();
                go(&category.name, &mut ancestors, doc, &mut visit);
            }
        }
    }
}

fn parse_node(
    value: &mut Value,
    level: Level,
    fallback_title: Option<&str>,
    ancestors: &[String],
    relabelled: &mut usize,
) -> Result<HierNode> {
    let obj = value.as_object_mut().ok_or_else(|| {
        IndexError::InvalidRecord(format!("{} record must be an object", level))
    })?;

    if relabel_hash_field(obj, level, ancestors).is_some() {
        *relabelled += 1;
    }

    let title = match obj.get("title").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => fallback_title
            .map(str::to_string)
            .ok_or_else(|| IndexError::InvalidRecord(format!("{} record without title", level)))?,
    };

    let hash = obj
        .get(level.hash_field())
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
        .map(str::to_string);

    let mut node = HierNode {
        level,
        title,
        number: scalar_string(obj.get("number")),
        content: scalar_string(obj.get("content")),
        page_number: obj.get("page_number").and_then(page_number),
        hash,
        children: Vec::new(),
    };

    let mut lineage = ancestors.to_vec();
    if let Some(h) = &node.hash {
        lineage.push(h.clone());
    }

    if let Some(children) = obj.get_mut(level.children_field()) {
        let children = children.as_array_mut().ok_or_else(|| {
            IndexError::InvalidRecord(format!(
                "'{}' of {} '{}' must be an array",
                level.children_field(),
                level,
                node.title
            ))
        })?;
        for child in children.iter_mut() {
            node.children
                .push(parse_node(child, level.child(), None, &lineage, relabelled)?);
        }
    }

    Ok(node)
}

/// Rename a hash stored under the wrong field name to `level.hash_field()`
///
/// Only a value that is not one of the ancestor hashes is moved; inherited
/// ancestor hashes stay where they are. The hash value itself is never
/// regenerated, so links to already-indexed entries survive.
/// Returns the field that was renamed.
pub fn relabel_hash_field(
    obj: &mut Map<String, Value>,
    level: Level,
    ancestors: &[String],
) -> Option<String> {
    let expected = level.hash_field();
    let has_expected = obj
        .get(expected)
        .and_then(Value::as_str)
        .is_some_and(|h| !h.is_empty());
    if has_expected {
        return None;
    }

    let candidates: Vec<String> = obj
        .iter()
        .filter(|(key, _)| key.starts_with("hash_") && key.as_str() != expected)
        .filter_map(|(key, value)| {
            let hash = value.as_str().filter(|h| !h.is_empty())?;
            (!ancestors.iter().any(|a| a == hash)).then(|| key.clone())
        })
        .collect();

    match candidates.as_slice() {
        [field] => {
            let value = obj.remove(field)?;
            warn!(
                level = %level,
                from = %field,
                to = expected,
                "Relabelling misplaced hash field"
            );
            obj.insert(expected.to_string(), value);
            Some(field.clone())
        }
        [] => None,
        many => {
            warn!(level = %level, fields = ?many, "Ambiguous hash fields, leaving record untouched");
            None
        }
    }
}

fn scalar_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn page_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
