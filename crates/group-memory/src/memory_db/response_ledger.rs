//! Rolling per-conversation store of the agent's own recent outputs
use crate::error::{retry_transient, StoreResult};
use crate::memory_db::schema::AgentResponse;
use crate::memory_db::{checkout, DbPool};
use crate::utils::text_utils::TextUtils;
use rusqlite::params;
use tracing::debug;

pub struct ResponseLedger {
    pool: DbPool,
    capacity: usize,
}

impl ResponseLedger {
    pub fn new(pool: DbPool, capacity: usize) -> Self {
        Self { pool, capacity: capacity.max(1) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, conversation_id: &str, text: &str) -> StoreResult<()> {
        self.record_at(conversation_id, text, chrono::Utc::now().timestamp_millis() as f64 / 1000.0)
    }

    /// Insert a response and trim the conversation back to capacity inside one
    /// write transaction, so concurrent writers never observe more than `capacity` rows.
    pub fn record_at(&self, conversation_id: &str, text: &str, produced_at: f64) -> StoreResult<()> {
        let fingerprint = TextUtils::fingerprint(text);
        let trimmed = retry_transient(|| {
            let mut conn = checkout(&self.pool)?;
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO agent_responses (conversation_id, text, produced_at, context_fingerprint)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, text, produced_at, &fingerprint],
            )?;
            let trimmed = tx.execute(
                "DELETE FROM agent_responses
                 WHERE conversation_id = ?1 AND id NOT IN (
                     SELECT id FROM agent_responses
                     WHERE conversation_id = ?1
                     ORDER BY produced_at DESC, id DESC
                     LIMIT ?2
                 )",
                params![conversation_id, self.capacity as i64],
            )?;
            tx.commit()?;
            Ok(trimmed)
        })?;

        debug!(
            "Recorded response {} for conversation {} (evicted {})",
            fingerprint, conversation_id, trimmed
        );
        Ok(())
    }

    /// Up to `limit` most recent responses, returned oldest first
    pub fn recent_tail(&self, conversation_id: &str, limit: usize) -> StoreResult<Vec<AgentResponse>> {
        let conn = checkout(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id, text, produced_at, context_fingerprint
             FROM agent_responses
             WHERE conversation_id = ?1
             ORDER BY produced_at DESC, id DESC
             LIMIT ?2",
        )?;
        let mut responses = stmt
            .query_map(params![conversation_id, limit as i64], |row| {
                Ok(AgentResponse {
                    conversation_id: row.get(0)?,
                    text: row.get(1)?,
                    produced_at: row.get(2)?,
                    context_fingerprint: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        responses.reverse();
        Ok(responses)
    }
}
