//! Memory database module - SQLite-backed storage for messages, chunks and agent responses
pub mod schema;
pub mod migration;
pub mod message_store;
pub mod chunk_store;
pub mod response_ledger;

pub use schema::*;
pub use migration::MigrationManager;
pub use message_store::MessageStore;
pub use chunk_store::ChunkStore;
pub use response_ledger::ResponseLedger;

use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{StoreError, StoreResult};

pub(crate) type DbPool = Arc<Pool<SqliteConnectionManager>>;
pub(crate) type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// The three logical stores sharing one connection pool.
/// Each store is the only writer of its own table.
pub struct MemoryDatabase {
    pub messages: MessageStore,
    pub chunks: ChunkStore,
    pub responses: ResponseLedger,
    pool: DbPool,
}

impl MemoryDatabase {
    /// Open (or create) the database file and apply pending migrations
    pub fn new(db_path: &Path, pool_size: u32, ledger_capacity: usize) -> anyhow::Result<Self> {
        info!("Opening memory database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        info!("Memory database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool), ledger_capacity))
    }

    /// Private in-memory database. Backed by a single pooled connection so every
    /// store sees the same data.
    pub fn new_in_memory(ledger_capacity: usize) -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool), ledger_capacity))
    }

    fn from_pool(pool: DbPool, ledger_capacity: usize) -> Self {
        Self {
            messages: MessageStore::new(Arc::clone(&pool)),
            chunks: ChunkStore::new(Arc::clone(&pool)),
            responses: ResponseLedger::new(Arc::clone(&pool), ledger_capacity),
            pool,
        }
    }

    pub fn stats(&self) -> StoreResult<DatabaseStats> {
        let conn = checkout(&self.pool)?;
        Ok(migration::get_database_stats(&conn)?)
    }

    /// Run arbitrary SQL on a pooled connection, for fault injection in tests
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> StoreResult<()> {
        checkout(&self.pool)?.execute_batch(sql)?;
        Ok(())
    }
}

pub(crate) fn checkout(pool: &DbPool) -> StoreResult<PooledConn> {
    pool.get().map_err(StoreError::from)
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_stores_share_one_database() {
        let db = MemoryDatabase::new_in_memory(5).unwrap();
        db.messages.append("c1", "u1", "hello there", 100.0).unwrap();
        db.responses.record("c1", "hi").unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.unconsolidated_messages, 1);
        assert_eq!(stats.total_responses, 1);
        assert_eq!(stats.active_conversations, 1);
    }

    #[test]
    fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        {
            let db = MemoryDatabase::new(&path, 4, 5).unwrap();
            assert!(db.messages.append("c1", "u1", "persist me", 1.0).unwrap());
        }
        let db = MemoryDatabase::new(&path, 4, 5).unwrap();
        assert!(!db.messages.append("c1", "u1", "persist me", 1.0).unwrap());
        assert_eq!(db.stats().unwrap().total_messages, 1);
    }

    #[test]
    fn test_stats_error_is_reported() {
        let db = MemoryDatabase::new_in_memory(5).unwrap();
        db.execute_raw("DROP TABLE chunks").unwrap();
        assert!(matches!(db.stats(), Err(StoreError::Sqlite(_))));
    }
}
