//! Storage error taxonomy shared by the message store, chunk store and response ledger

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error raised by any of the SQLite-backed stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Could not check a connection out of the pool
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// SQLite rejected or failed the statement
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row violates a data-model invariant
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// True for failures that are worth one immediate retry (lock contention, pool exhaustion)
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Pool(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

const RETRY_PAUSE: Duration = Duration::from_millis(50);

/// Run a cheap store operation, retrying it once if the first attempt fails transiently.
pub fn retry_transient<T, F>(mut op: F) -> StoreResult<T>
where
    F: FnMut() -> StoreResult<T>,
{
    match op() {
        Err(e) if e.is_transient() => {
            debug!("Transient store failure, retrying once: {}", e);
            std::thread::sleep(RETRY_PAUSE);
            op()
        }
        other => other,
    }
}
