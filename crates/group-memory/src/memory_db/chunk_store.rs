//! Chunk storage. Written only by the consolidation engine; chunks are never updated in place.
use crate::error::{StoreError, StoreResult};
use crate::memory_db::schema::Chunk;
use crate::memory_db::{checkout, DbPool};
use rusqlite::{params, Row};
use tracing::debug;

const CHUNK_COLUMNS: &str = "id, conversation_id, topic, summary, created_at, window_start,
     window_end, base_importance, message_count, participant_ids";

pub struct ChunkStore {
    pool: DbPool,
}

impl ChunkStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist a chunk. A chunk with the same id is left untouched, so re-summarizing
    /// a window after an interrupted cycle cannot rewrite or duplicate memory.
    /// Returns `true` if a new row was written.
    pub fn insert(&self, chunk: &Chunk) -> StoreResult<bool> {
        if chunk.window_start > chunk.window_end {
            return Err(StoreError::Corrupt(format!(
                "chunk {} has window_start after window_end",
                chunk.id
            )));
        }
        let conn = checkout(&self.pool)?;
        let written = conn.execute(
            "INSERT OR IGNORE INTO chunks
             (id, conversation_id, topic, summary, created_at, window_start,
              window_end, base_importance, message_count, participant_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &chunk.id,
                &chunk.conversation_id,
                &chunk.topic,
                &chunk.summary,
                chunk.created_at,
                chunk.window_start,
                chunk.window_end,
                chunk.base_importance,
                chunk.message_count as i64,
                serde_json::to_string(&chunk.participant_ids)?,
            ],
        )?;
        debug!(
            "Chunk {} for conversation {} ({} messages) {}",
            chunk.id,
            chunk.conversation_id,
            chunk.message_count,
            if written == 1 { "stored" } else { "already present" }
        );
        Ok(written == 1)
    }

    /// All chunks of one conversation, newest first
    pub fn for_conversation(&self, conversation_id: &str) -> StoreResult<Vec<Chunk>> {
        let conn = checkout(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE conversation_id = ?1 ORDER BY created_at DESC, id",
            CHUNK_COLUMNS
        ))?;
        let mut rows = stmt.query([conversation_id])?;
        let mut chunks = Vec::new();
        while let Some(row) = rows.next()? {
            chunks.push(row_to_chunk(row)?);
        }
        Ok(chunks)
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<Chunk>> {
        let conn = checkout(&self.pool)?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM chunks WHERE id = ?1", CHUNK_COLUMNS))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_chunk(row)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self, conversation_id: &str) -> StoreResult<usize> {
        let conn = checkout(&self.pool)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Conversations that have at least one chunk
    pub fn conversations(&self) -> StoreResult<Vec<String>> {
        let conn = checkout(&self.pool)?;
        let mut stmt = conn.prepare("SELECT DISTINCT conversation_id FROM chunks ORDER BY conversation_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

fn row_to_chunk(row: &Row) -> StoreResult<Chunk> {
    let participants_json: String = row.get(9)?;
    let participant_ids: Vec<String> = serde_json::from_str(&participants_json)?;
    let message_count: i64 = row.get(8)?;

    Ok(Chunk {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        topic: row.get(2)?,
        summary: row.get(3)?,
        created_at: row.get(4)?,
        window_start: row.get(5)?,
        window_end: row.get(6)?,
        base_importance: row.get(7)?,
        message_count: usize::try_from(message_count)
            .map_err(|_| StoreError::Corrupt(format!("negative message_count {}", message_count)))?,
        participant_ids,
    })
}
