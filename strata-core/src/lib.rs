//! # Strata Core
//!
//! Core types, traits, and configuration for the strata hybrid retrieval engine.
//!
//! This crate provides:
//! - Configuration (`config`) - YAML-loadable settings for every component
//! - Errors (`error`) - Shared error type and retry/fatal classification
//! - Logging (`logging`) - Tracing subscriber with daily file rotation
//! - Passages (`passage`) - The value type exchanged between stores and callers
//! - Capabilities (`rag`) - Embedding and cross-encoder interfaces
//! - Retry (`retry`) - Exponential backoff for ingestion-time writes

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod passage;
pub mod rag;
pub mod retry;

pub use error::{Error, Result};

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::config::{
        GraphConfig, IngestConfig, LoggingConfig, RetrievalConfig, StrataConfig, VectorConfig,
    };
    pub use crate::error::{Error, Result};
    pub use crate::passage::{flatten_metadata, Passage, PassageSource};
    pub use crate::rag::{cosine_similarity, CrossEncoder, Embeddings};
    pub use crate::retry::RetryPolicy;
}
