//! Error types for the strata engine

use thiserror::Error;

/// Result type alias using strata's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type shared by providers and configuration
#[derive(Debug, Error)]
pub enum Error {
    // ============ Configuration Errors ============
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML configuration could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml_ng::Error),

    // ============ Provider Errors ============
    /// Provider API error
    #[error("Provider API error: {0}")]
    ProviderApi(String),

    /// Provider authentication failed
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider rate limit exceeded
    #[error("Provider rate limit exceeded: retry after {retry_after_secs}s")]
    ProviderRateLimit {
        /// Seconds to wait before retrying
        retry_after_secs: u64,
    },

    /// Provider returned a response of the wrong shape
    #[error("Provider response error: {0}")]
    ProviderResponse(String),

    /// A call did not finish in time
    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    Timeout {
        /// What was being attempted
        operation: String,
        /// Configured limit in milliseconds
        timeout_ms: u64,
    },

    // ============ Serialization Errors ============
    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ============ Network Errors ============
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // ============ System Errors ============
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============ Generic Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderRateLimit { .. } | Self::Timeout { .. } | Self::Http(_)
        )
    }

    /// Configuration-level failures for which no partial result is possible
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::ConfigParse(_) | Self::ProviderAuth(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::timeout("embed", 100).is_retryable());
        assert!(!Error::timeout("embed", 100).is_fatal());
        assert!(Error::ProviderAuth("bad key".into()).is_fatal());
        assert!(!Error::ProviderApi("500".into()).is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("rerank", 250);
        assert_eq!(err.to_string(), "Operation timed out after 250ms: rerank");
    }
}
