//! Bounded SQLite connection pool for the graph store
//!
//! At most `max_size` connections exist at once. When all are checked out,
//! callers wait up to the acquire timeout for one to be returned instead of
//! opening more (backpressure). A checked-out connection goes back to the
//! pool when its guard drops, on success, error and timeout alike.

use crate::error::{IndexError, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

struct PoolInner {
    db_path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    max_size: usize,
}

/// Shared handle to the pool; cheap to clone
#[derive(Clone)]
pub struct GraphPool {
    inner: Arc<PoolInner>,
    acquire_timeout: Duration,
}

impl GraphPool {
    pub fn new(
        db_path: impl Into<PathBuf>,
        max_size: usize,
        acquire_timeout: Duration,
        busy_timeout: Duration,
    ) -> Self {
        let max_size = max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                db_path: db_path.into(),
                busy_timeout,
                idle: Mutex::new(Vec::with_capacity(max_size)),
                permits: Arc::new(Semaphore::new(max_size)),
                max_size,
            }),
            acquire_timeout,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Connections not currently checked out
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Check out a connection, waiting at most the acquire timeout
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            IndexError::StoreUnavailable(format!(
                "graph pool exhausted: no connection within {:?}",
                self.acquire_timeout
            ))
        })?
        .map_err(|_| IndexError::StoreUnavailable("graph pool closed".to_string()))?;

        let idle = self.inner.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.inner.open()?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Check out a connection and run blocking SQLite work off the async runtime
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let mut conn = self.acquire().await?;
        tokio::task::spawn_blocking(move || f(&mut conn))
            .await
            .map_err(|e| IndexError::Custom(format!("graph task failed: {}", e)))?
    }
}

impl PoolInner {
    fn open(&self) -> Result<Connection> {
        debug!("Opening graph connection to {:?}", self.db_path);
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(conn)
    }
}

/// A checked-out connection; returned to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    // Released after the connection is back on the idle stack
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `None` during drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().push(conn);
        }
    }
}
