//! Backfill of historical chat logs from JSON Lines, one message object per line:
//! `{"conversation_id": "...", "author_id": "...", "text": "...", "timestamp": 1700000000.0}`
use std::io::BufRead;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, warn};

use crate::memory_db::NewMessage;

/// Media markers some transports log in place of text
const PLACEHOLDER_TEXTS: [&str; 2] = ["[photo]", "[voice]"];

/// Messages accepted from a backfill file, plus what was rejected on the way
#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    pub messages: Vec<NewMessage>,
    pub lines_read: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub lines_read: usize,
    /// Malformed lines, blank text and media placeholders
    pub skipped: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub conversations_consolidated: usize,
    pub chunks_created: usize,
    pub consolidation_failures: usize,
}

/// Parse a JSONL backfill. Bad lines are logged and counted, blank lines ignored;
/// only a read error fails the whole batch.
pub fn read_jsonl<R: BufRead>(reader: R) -> anyhow::Result<ImportBatch> {
    let mut batch = ImportBatch::default();

    for (index, line) in reader.lines().enumerate() {
        let line_num = index + 1;
        let line = line.with_context(|| format!("Failed to read import line {}", line_num))?;
        if line.trim().is_empty() {
            continue;
        }
        batch.lines_read += 1;

        let message: NewMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping import line {}: {}", line_num, e);
                batch.skipped += 1;
                continue;
            }
        };
        if let Some(reason) = rejection(&message) {
            debug!("Skipping import line {}: {}", line_num, reason);
            batch.skipped += 1;
            continue;
        }
        batch.messages.push(message);
    }
    Ok(batch)
}

fn rejection(message: &NewMessage) -> Option<&'static str> {
    if message.conversation_id.trim().is_empty() {
        return Some("empty conversation_id");
    }
    if message.author_id.trim().is_empty() {
        return Some("empty author_id");
    }
    let text = message.text.trim();
    if text.is_empty() || PLACEHOLDER_TEXTS.contains(&text) {
        return Some("no text content");
    }
    if !message.received_at.is_finite() || message.received_at < 0.0 {
        return Some("invalid timestamp");
    }
    None
}
