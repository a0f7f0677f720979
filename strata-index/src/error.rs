use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Vector store serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error(transparent)]
    Core(#[from] strata_core::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Rerank failed: {0}")]
    RerankFailure(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("{0}")]
    Custom(String),
}

impl IndexError {
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Transient failures worth retrying at ingestion time
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) | Self::Timeout { .. } => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Core(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Configuration-level failures: no partial result is possible
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::CollectionNotFound(_) | Self::DimensionMismatch { .. } => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::PermissionDenied
                    | rusqlite::ErrorCode::NotADatabase
            ),
            Self::Core(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
