//! Builds the context object handed to the response generator:
//! recent raw messages, ranked chunks, the agent's own recent replies and time info.
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::retriever::{RelevanceRetriever, RetrieverStats};
use super::time_info::TimeInfo;
use crate::config::AssemblerConfig;
use crate::consolidation::engine::now_epoch;
use crate::error::StoreResult;
use crate::memory_db::{AgentResponse, MemoryDatabase, Message, RankedChunk};
use crate::utils::TextUtils;

const MAX_LISTED_PARTICIPANTS: usize = 3;
const RESPONSE_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub conversation_id: String,
    pub time_info: TimeInfo,
    /// Chronological, oldest first
    pub recent_messages: Vec<Message>,
    /// Best first
    pub ranked_chunks: Vec<RankedChunk>,
    /// Chronological, oldest first
    pub recent_responses: Vec<AgentResponse>,
    /// Present only when the query asked what the agent remembers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_stats: Option<RetrieverStats>,
    #[serde(skip)]
    utc_offset_hours: i32,
}

pub struct ContextAssembler {
    db: Arc<MemoryDatabase>,
    retriever: Arc<RelevanceRetriever>,
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(db: Arc<MemoryDatabase>, retriever: Arc<RelevanceRetriever>, config: AssemblerConfig) -> Self {
        Self { db, retriever, config }
    }

    pub fn assemble(&self, conversation_id: &str, query: &str, context: &str) -> AssembledContext {
        self.assemble_at(conversation_id, query, context, now_epoch())
    }

    /// Never fails: a store read that errors contributes an empty section
    pub fn assemble_at(&self, conversation_id: &str, query: &str, context: &str, now: f64) -> AssembledContext {
        let utc_offset_hours = self.retriever.config().utc_offset_hours;
        let time_info = TimeInfo::at(now, utc_offset_hours);

        let recent_messages = or_empty(
            "message tail",
            self.db.messages.tail(conversation_id, self.config.message_tail),
        );
        let ranked_chunks = or_empty(
            "chunk retrieval",
            self.retriever.find_relevant_at(conversation_id, query, context, &time_info),
        );
        let recent_responses = or_empty(
            "response tail",
            self.db.responses.recent_tail(conversation_id, self.config.response_tail),
        );

        let memory_stats = if RelevanceRetriever::is_memory_query(query) {
            match self.retriever.stats_at(conversation_id, now) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!("Memory stats unavailable for {}: {}", conversation_id, e);
                    None
                }
            }
        } else {
            None
        };

        debug!(
            "Assembled context for {}: {} messages, {} chunks, {} responses",
            conversation_id,
            recent_messages.len(),
            ranked_chunks.len(),
            recent_responses.len()
        );

        AssembledContext {
            conversation_id: conversation_id.to_string(),
            time_info,
            recent_messages,
            ranked_chunks,
            recent_responses,
            memory_stats,
            utc_offset_hours,
        }
    }
}

fn or_empty<T>(what: &str, result: StoreResult<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!("Context {} failed, continuing without it: {}", what, e);
        Vec::new()
    })
}

impl AssembledContext {
    fn local(&self, timestamp: f64) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        DateTime::from_timestamp_millis((timestamp * 1000.0) as i64)
            .unwrap_or_default()
            .with_timezone(&offset)
    }

    /// Memory block for the prompt, empty when nothing was retrieved
    pub fn render_memory(&self) -> String {
        if self.ranked_chunks.is_empty() {
            return String::new();
        }

        let mut out = String::from("=== GROUP MEMORY ===\n");
        let _ = writeln!(out, "Current time: {} ({})\n", self.time_info.datetime, self.time_info.weekday);

        for (i, ranked) in self.ranked_chunks.iter().enumerate() {
            let chunk = &ranked.chunk;
            let _ = writeln!(out, "{}. {} ({})", i + 1, chunk.topic, TextUtils::format_age(ranked.age_days));
            let _ = writeln!(
                out,
                "   Period: {} - {}",
                self.local(chunk.window_start).format("%d.%m %H:%M"),
                self.local(chunk.window_end).format("%d.%m %H:%M")
            );
            if !chunk.participant_ids.is_empty() {
                let mut participants = chunk
                    .participant_ids
                    .iter()
                    .take(MAX_LISTED_PARTICIPANTS)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                if chunk.participant_ids.len() > MAX_LISTED_PARTICIPANTS {
                    participants.push_str("...");
                }
                let _ = writeln!(out, "   Participants: {}", participants);
            }
            let _ = writeln!(out, "   {}", chunk.summary);
            let _ = writeln!(out, "   Relevance: {:.2}\n", ranked.relevance_score);
        }

        out.push_str(
            "The current conversation takes priority over these memories. \
             Older entries may be out of date; mention their age if you rely on them.\n",
        );
        out
    }

    /// Full context block: memory, then the raw message tail, then the agent's own replies
    pub fn render_prompt(&self) -> String {
        let mut out = self.render_memory();

        if !self.recent_messages.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("=== RECENT MESSAGES ===\n");
            for message in &self.recent_messages {
                let _ = writeln!(
                    out,
                    "[{}] {}: {}",
                    self.local(message.received_at).format("%H:%M"),
                    TextUtils::short_author(&message.author_id),
                    TextUtils::normalize_whitespace(&message.text)
                );
            }
        }

        if !self.recent_responses.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("=== YOUR RECENT RESPONSES ===\n");
            for response in &self.recent_responses {
                let text = TextUtils::normalize_whitespace(&response.text);
                let _ = writeln!(out, "- {}", TextUtils::truncate_with_ellipsis(&text, RESPONSE_PREVIEW_CHARS));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::memory_db::Chunk;

    // 2024-01-06 03:00 UTC
    const NOW: f64 = 1_704_510_000.0;
    const DAY: f64 = 86_400.0;

    fn setup() -> (Arc<MemoryDatabase>, ContextAssembler) {
        let db = Arc::new(MemoryDatabase::new_in_memory(5).unwrap());
        let retriever = Arc::new(RelevanceRetriever::new(Arc::clone(&db), RetrievalConfig::default()));
        let assembler = ContextAssembler::new(Arc::clone(&db), retriever, AssemblerConfig::default());
        (db, assembler)
    }

    fn add_chunk(db: &MemoryDatabase, topic: &str, summary: &str, age_days: f64, participants: &[&str]) {
        let created_at = NOW - age_days * DAY;
        let chunk = Chunk {
            id: Chunk::derive_id("c1", created_at, 6),
            conversation_id: "c1".to_string(),
            topic: topic.to_string(),
            summary: summary.to_string(),
            created_at,
            window_start: 1_704_441_600.0, // 05.01 08:00 UTC
            window_end: 1_704_445_200.0,   // 05.01 09:00 UTC
            base_importance: 0.8,
            message_count: 6,
            participant_ids: participants.iter().map(|p| p.to_string()).collect(),
        };
        db.chunks.insert(&chunk).unwrap();
    }

    // ===== Assembly =====

    #[test]
    fn test_empty_conversation_assembles_empty_sections() {
        let (_db, assembler) = setup();
        let ctx = assembler.assemble_at("c1", "hello", "", NOW);
        assert!(ctx.recent_messages.is_empty());
        assert!(ctx.ranked_chunks.is_empty());
        assert!(ctx.recent_responses.is_empty());
        assert!(ctx.memory_stats.is_none());
        assert_eq!(ctx.render_prompt(), "");
    }

    #[test]
    fn test_assemble_collects_all_sections() {
        let (db, assembler) = setup();
        for i in 0..20 {
            db.messages.append("c1", "user-alice", &format!("msg {}", i), NOW - 100.0 + i as f64).unwrap();
        }
        for i in 0..4 {
            db.responses.record_at("c1", &format!("reply {}", i), NOW - 50.0 + i as f64).unwrap();
        }
        add_chunk(&db, "Deploy pipeline", "Staging deploy broke twice", 2.0, &["alice"]);

        let ctx = assembler.assemble_at("c1", "deploy staging", "", NOW);
        assert_eq!(ctx.recent_messages.len(), 15);
        assert_eq!(ctx.recent_messages[0].text, "msg 5");
        assert_eq!(ctx.recent_messages[14].text, "msg 19");
        assert_eq!(ctx.recent_responses.len(), 3);
        assert_eq!(ctx.recent_responses[2].text, "reply 3");
        assert_eq!(ctx.ranked_chunks.len(), 1);
        assert_eq!(ctx.time_info.weekday, "Saturday");
    }

    #[test]
    fn test_memory_query_attaches_stats() {
        let (db, assembler) = setup();
        add_chunk(&db, "Old trip", "Mountains", 200.0, &["bob"]);
        let ctx = assembler.assemble_at("c1", "what do you remember?", "", NOW);
        assert_eq!(ctx.ranked_chunks.len(), 1);
        let stats = ctx.memory_stats.unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.age_distribution.ancient, 1);
    }

    // ===== Rendering =====

    #[test]
    fn test_render_memory_block() {
        let (db, assembler) = setup();
        add_chunk(&db, "Deploy pipeline", "Staging deploy broke twice", 2.0, &["alice", "bob", "carol", "dave"]);

        let ctx = assembler.assemble_at("c1", "deploy staging", "", NOW);
        let memory = ctx.render_memory();
        assert!(memory.starts_with("=== GROUP MEMORY ===\n"));
        assert!(memory.contains("Current time: 2024-01-06 03:00:00 (Saturday)"));
        assert!(memory.contains("1. Deploy pipeline (2d ago)"));
        assert!(memory.contains("Period: 05.01 08:00 - 05.01 09:00"));
        assert!(memory.contains("Participants: alice, bob, carol..."));
        assert!(memory.contains("Staging deploy broke twice"));
        assert!(memory.contains("Relevance: 0."));
        assert!(memory.contains("takes priority"));
    }

    #[test]
    fn test_render_prompt_sections() {
        let (db, assembler) = setup();
        // 02:55 UTC
        db.messages.append("c1", "user-1234", "hi\n  there", NOW - 300.0).unwrap();
        db.responses.record_at("c1", "hello back", NOW - 200.0).unwrap();

        let prompt = assembler.assemble_at("c1", "hi", "", NOW).render_prompt();
        assert!(!prompt.contains("GROUP MEMORY"));
        assert!(prompt.starts_with("=== RECENT MESSAGES ===\n[02:55] 1234: hi there\n"));
        assert!(prompt.contains("\n=== YOUR RECENT RESPONSES ===\n- hello back\n"));
    }
}
