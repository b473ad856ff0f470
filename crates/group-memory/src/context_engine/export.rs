//! Plain-text dump of everything remembered for one conversation
use std::fmt::Write as _;

use chrono::DateTime;

use crate::memory_db::Chunk;

fn format_ts(timestamp: f64, pattern: &str) -> String {
    DateTime::from_timestamp_millis((timestamp * 1000.0) as i64)
        .unwrap_or_default()
        .format(pattern)
        .to_string()
}

/// Renders chunks oldest first. Times are UTC.
pub fn render_conversation_export(conversation_id: &str, chunks: &[Chunk], exported_at: f64) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));

    let separator = "-".repeat(80);
    let mut out = String::new();
    let _ = writeln!(out, "MEMORY EXPORT FOR CONVERSATION {}", conversation_id);
    let _ = writeln!(out, "Exported: {}", format_ts(exported_at, "%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Total chunks: {}", ordered.len());
    let _ = writeln!(out, "{}\n", "=".repeat(80));

    for (i, chunk) in ordered.iter().enumerate() {
        let _ = writeln!(out, "CHUNK #{}", i + 1);
        let _ = writeln!(out, "ID: {}", chunk.id);
        let _ = writeln!(out, "TOPIC: {}", chunk.topic);
        let _ = writeln!(out, "CREATED: {}", format_ts(chunk.created_at, "%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(
            out,
            "PERIOD: {} - {}",
            format_ts(chunk.window_start, "%Y-%m-%d %H:%M"),
            format_ts(chunk.window_end, "%Y-%m-%d %H:%M")
        );
        let _ = writeln!(out, "IMPORTANCE: {:.2}", chunk.base_importance);
        let _ = writeln!(out, "MESSAGES: {}", chunk.message_count);
        let _ = writeln!(out, "PARTICIPANTS: {}", chunk.participant_ids.join(", "));
        let _ = writeln!(out, "CONTENT:\n{}", chunk.summary);
        let _ = writeln!(out, "{}", separator);
    }

    out
}
