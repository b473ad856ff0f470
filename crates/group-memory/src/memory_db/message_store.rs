//! Deduplicated log of raw inbound messages
use crate::error::{retry_transient, StoreResult};
use crate::memory_db::schema::{Message, NewMessage};
use crate::memory_db::{checkout, DbPool};
use rusqlite::{params, params_from_iter, Row};
use tracing::debug;

const MESSAGE_COLUMNS: &str = "id, conversation_id, author_id, text, received_at, consolidated";

pub struct MessageStore {
    pool: DbPool,
}

impl MessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert one message. Returns `false` when the exact
    /// (conversation, author, text, timestamp) tuple is already stored.
    pub fn append(
        &self,
        conversation_id: &str,
        author_id: &str,
        text: &str,
        received_at: f64,
    ) -> StoreResult<bool> {
        let inserted = retry_transient(|| {
            let conn = checkout(&self.pool)?;
            let changed = conn.execute(
                "INSERT OR IGNORE INTO messages (conversation_id, author_id, text, received_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, author_id, text, received_at],
            )?;
            Ok(changed == 1)
        })?;

        if inserted {
            debug!("Stored message for conversation {}", conversation_id);
        } else {
            debug!("Duplicate message ignored for conversation {}", conversation_id);
        }
        Ok(inserted)
    }

    /// Insert a batch inside one IMMEDIATE transaction, with the same dedup rule as
    /// [`append`](Self::append). The returned flags line up with `messages`;
    /// on error nothing from the batch is stored.
    pub fn append_many(&self, messages: &[NewMessage]) -> StoreResult<Vec<bool>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let inserted = retry_transient(|| {
            let mut conn = checkout(&self.pool)?;
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let mut inserted = Vec::with_capacity(messages.len());
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO messages (conversation_id, author_id, text, received_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for message in messages {
                    let changed = stmt.execute(params![
                        &message.conversation_id,
                        &message.author_id,
                        &message.text,
                        message.received_at
                    ])?;
                    inserted.push(changed == 1);
                }
            }
            tx.commit()?;
            Ok(inserted)
        })?;

        debug!(
            "Batch stored {} of {} messages",
            inserted.iter().filter(|new| **new).count(),
            messages.len()
        );
        Ok(inserted)
    }

    /// Most recent `limit` messages with distinct text, returned oldest first.
    /// When the same text was stored more than once only its latest copy is kept.
    pub fn tail(&self, conversation_id: &str, limit: usize) -> StoreResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = checkout(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols} FROM (
                 SELECT {cols}, ROW_NUMBER() OVER (
                     PARTITION BY text ORDER BY received_at DESC, id DESC
                 ) AS copy_rank
                 FROM messages
                 WHERE conversation_id = ?1
             )
             WHERE copy_rank = 1
             ORDER BY received_at DESC, id DESC
             LIMIT ?2",
            cols = MESSAGE_COLUMNS
        ))?;
        let mut messages = stmt
            .query_map(params![conversation_id, limit as i64], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Unconsolidated messages strictly older than `cutoff`, ordered by
    /// conversation then timestamp. `None` scans every conversation.
    pub fn unconsolidated_older_than(
        &self,
        conversation_id: Option<&str>,
        cutoff: f64,
    ) -> StoreResult<Vec<Message>> {
        let conn = checkout(&self.pool)?;
        let messages = match conversation_id {
            Some(conversation_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE consolidated = FALSE AND received_at < ?1 AND conversation_id = ?2
                     ORDER BY received_at, id",
                    MESSAGE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![cutoff, conversation_id], row_to_message)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE consolidated = FALSE AND received_at < ?1
                     ORDER BY conversation_id, received_at, id",
                    MESSAGE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![cutoff], row_to_message)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(messages)
    }

    /// Flip `consolidated` for every id in one transaction. Already-marked ids are a no-op;
    /// either the whole set is marked or none of it is.
    pub fn mark_consolidated(&self, ids: &[i64]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = checkout(&self.pool)?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut updated = 0;
        for batch in ids.chunks(500) {
            let placeholders = vec!["?"; batch.len()].join(",");
            let sql = format!(
                "UPDATE messages SET consolidated = TRUE
                 WHERE consolidated = FALSE AND id IN ({})",
                placeholders
            );
            updated += tx.execute(&sql, params_from_iter(batch.iter()))?;
        }
        tx.commit()?;
        debug!("Marked {} of {} messages consolidated", updated, ids.len());
        Ok(updated)
    }

    /// Retention sweep: delete consolidated messages received before `cutoff`.
    /// Unconsolidated messages are kept until they have been folded into memory.
    pub fn sweep_consolidated_before(&self, cutoff: f64) -> StoreResult<usize> {
        let conn = checkout(&self.pool)?;
        let deleted = conn.execute(
            "DELETE FROM messages WHERE consolidated = TRUE AND received_at < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            debug!("Retention sweep removed {} messages", deleted);
        }
        Ok(deleted)
    }
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        author_id: row.get(2)?,
        text: row.get(3)?,
        received_at: row.get(4)?,
        consolidated: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::memory_db::{MemoryDatabase, NewMessage};
    use std::sync::Arc;

    fn db() -> MemoryDatabase {
        MemoryDatabase::new_in_memory(5).unwrap()
    }

    // ===== Append / Dedup Tests =====

    #[test]
    fn test_duplicate_append_is_a_noop() {
        let db = db();
        let results: Vec<bool> = (0..4)
            .map(|_| db.messages.append("c1", "alice", "same words", 1000.0).unwrap())
            .collect();

        assert_eq!(results, vec![true, false, false, false]);
        assert_eq!(db.stats().unwrap().total_messages, 1);
    }

    #[test]
    fn test_tuple_fields_each_break_dedup() {
        let db = db();
        assert!(db.messages.append("c1", "alice", "hi", 1.0).unwrap());
        assert!(db.messages.append("c2", "alice", "hi", 1.0).unwrap());
        assert!(db.messages.append("c1", "bob", "hi", 1.0).unwrap());
        assert!(db.messages.append("c1", "alice", "hi!", 1.0).unwrap());
        assert!(db.messages.append("c1", "alice", "hi", 2.0).unwrap());
        assert_eq!(db.stats().unwrap().total_messages, 5);
    }

    #[test]
    fn test_concurrent_duplicate_senders_insert_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(MemoryDatabase::new(&dir.path().join("m.db"), 8, 5).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || db.messages.append("c1", "alice", "retransmit", 42.0).unwrap())
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(db.stats().unwrap().total_messages, 1);
    }

    fn new_message(conversation: &str, text: &str, at: f64) -> NewMessage {
        NewMessage {
            conversation_id: conversation.to_string(),
            author_id: "alice".to_string(),
            text: text.to_string(),
            received_at: at,
        }
    }

    #[test]
    fn test_append_many_dedups_within_and_across_batches() {
        let db = db();
        db.messages.append("c1", "alice", "already here", 1.0).unwrap();

        let batch = vec![
            new_message("c1", "already here", 1.0),
            new_message("c1", "fresh", 2.0),
            new_message("c1", "fresh", 2.0),
            new_message("c2", "other chat", 3.0),
        ];
        assert_eq!(db.messages.append_many(&batch).unwrap(), vec![false, true, false, true]);
        assert_eq!(db.messages.append_many(&batch).unwrap(), vec![false; 4]);
        assert!(db.messages.append_many(&[]).unwrap().is_empty());
        assert_eq!(db.stats().unwrap().total_messages, 3);
    }

    #[test]
    fn test_append_many_is_all_or_nothing() {
        let db = db();
        db.execute_raw(
            "CREATE TRIGGER reject_poison BEFORE INSERT ON messages WHEN NEW.text = 'poison'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        let batch = vec![new_message("c1", "fine", 1.0), new_message("c1", "poison", 2.0)];
        assert!(db.messages.append_many(&batch).is_err());
        assert_eq!(db.stats().unwrap().total_messages, 0);
    }

    // ===== Tail Tests =====

    #[test]
    fn test_tail_is_chronological_and_limited() {
        let db = db();
        for i in 0..10 {
            db.messages.append("c1", "alice", &format!("message {}", i), i as f64).unwrap();
        }
        let tail = db.messages.tail("c1", 3).unwrap();
        let texts: Vec<&str> = tail.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["message 7", "message 8", "message 9"]);
    }

    #[test]
    fn test_tail_collapses_retransmitted_text() {
        let db = db();
        db.messages.append("c1", "alice", "hello", 1.0).unwrap();
        db.messages.append("c1", "alice", "ping", 2.0).unwrap();
        db.messages.append("c1", "alice", "ping", 2.5).unwrap();
        db.messages.append("c1", "bob", "ping", 3.0).unwrap();

        let tail = db.messages.tail("c1", 10).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "hello");
        assert_eq!(tail[1].text, "ping");
        assert_eq!(tail[1].author_id, "bob");
    }

    #[test]
    fn test_tail_of_unknown_conversation_is_empty() {
        let db = db();
        assert!(db.messages.tail("nobody", 5).unwrap().is_empty());
        assert!(db.messages.tail("nobody", 0).unwrap().is_empty());
    }

    // ===== Consolidation Read Path Tests =====

    #[test]
    fn test_unconsolidated_respects_cutoff_and_scope() {
        let db = db();
        db.messages.append("c1", "a", "old one", 100.0).unwrap();
        db.messages.append("c1", "a", "fresh", 500.0).unwrap();
        db.messages.append("c2", "b", "other chat", 50.0).unwrap();

        let all = db.messages.unconsolidated_older_than(None, 200.0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].conversation_id, "c1");
        assert_eq!(all[1].conversation_id, "c2");

        let scoped = db.messages.unconsolidated_older_than(Some("c1"), 200.0).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].text, "old one");

        let at_cutoff = db.messages.unconsolidated_older_than(Some("c1"), 500.0).unwrap();
        assert_eq!(at_cutoff.len(), 1);
    }

    #[test]
    fn test_mark_consolidated_is_idempotent() {
        let db = db();
        db.messages.append("c1", "a", "one", 1.0).unwrap();
        db.messages.append("c1", "a", "two", 2.0).unwrap();
        let ids: Vec<i64> = db
            .messages
            .unconsolidated_older_than(Some("c1"), 10.0)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(db.messages.mark_consolidated(&ids).unwrap(), 2);
        assert_eq!(db.messages.mark_consolidated(&ids).unwrap(), 0);
        assert_eq!(db.messages.mark_consolidated(&[]).unwrap(), 0);
        assert!(db.messages.unconsolidated_older_than(None, 10.0).unwrap().is_empty());

        let tail = db.messages.tail("c1", 5).unwrap();
        assert!(tail.iter().all(|m| m.consolidated));
    }

    #[test]
    fn test_retention_sweep_keeps_unconsolidated() {
        let db = db();
        db.messages.append("c1", "a", "folded", 1.0).unwrap();
        db.messages.append("c1", "a", "pending", 2.0).unwrap();
        db.messages.append("c1", "a", "recent", 100.0).unwrap();
        let folded = db.messages.unconsolidated_older_than(Some("c1"), 1.5).unwrap();
        db.messages.mark_consolidated(&[folded[0].id]).unwrap();

        assert_eq!(db.messages.sweep_consolidated_before(50.0).unwrap(), 1);
        let remaining: Vec<String> = db.messages.tail("c1", 10).unwrap().into_iter().map(|m| m.text).collect();
        assert_eq!(remaining, vec!["pending".to_string(), "recent".to_string()]);
    }
}
