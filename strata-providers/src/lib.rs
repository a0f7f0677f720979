//! # Strata Providers
//!
//! Embedding and cross-encoder clients for the strata engine.

#![warn(missing_docs)]

pub use strata_core::error::{Error, Result};
pub use strata_core::rag::{CrossEncoder, Embeddings};

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "tei")]
pub mod tei;

/// HTTP client configuration
#[derive(Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Connection pool idle timeout
    pub pool_idle_timeout_secs: u64,
    /// Max idle connections per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpConfig {
    /// Build a reqwest client
    pub fn build_client(&self) -> Result<reqwest::Client> {
        use std::time::Duration;

        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(self.pool_idle_timeout_secs))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Map a non-success HTTP status to the matching provider error
#[cfg(any(feature = "openai", feature = "ollama", feature = "tei"))]
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        401 | 403 => Err(Error::ProviderAuth(format!(
            "{} rejected credentials ({})",
            provider, status
        ))),
        429 => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            Err(Error::ProviderRateLimit { retry_after_secs })
        }
        _ => {
            let text = response.text().await.unwrap_or_default();
            Err(Error::ProviderApi(format!(
                "{} API error {}: {}",
                provider, status, text
            )))
        }
    }
}
