//! Row types for the memory database and the derived retrieval record
use serde::{Deserialize, Serialize};

/// One inbound chat utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub author_id: String,
    pub text: String,
    /// Epoch seconds, as reported by the transport
    pub received_at: f64,
    pub consolidated: bool,
}

/// A message not yet stored, as read from a backfill file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub author_id: String,
    pub text: String,
    #[serde(alias = "timestamp")]
    pub received_at: f64,
}

/// Compressed, topic-scoped memory derived from a run of messages.
/// Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub conversation_id: String,
    pub topic: String,
    pub summary: String,
    pub created_at: f64,
    pub window_start: f64,
    pub window_end: f64,
    pub base_importance: f64,
    pub message_count: usize,
    pub participant_ids: Vec<String>,
}

impl Chunk {
    /// Stable id: hash of conversation, window start and message count
    pub fn derive_id(conversation_id: &str, window_start: f64, message_count: usize) -> String {
        let key = format!("{}_{}_{}", conversation_id, window_start, message_count);
        let hash = blake3::hash(key.as_bytes()).to_hex();
        hash.as_str()[..16].to_string()
    }

    /// Topic and summary joined, the text the retriever scores against
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.topic, self.summary).to_lowercase()
    }
}

/// A chunk plus retrieval-time metrics. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub relevance_score: f64,
    pub age_days: f64,
    pub admitted: bool,
    pub time_bonus: f64,
    pub context_bonus: f64,
}

impl RankedChunk {
    pub fn final_score(&self) -> f64 {
        self.relevance_score + self.time_bonus + self.context_bonus
    }
}

/// One output the agent produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub conversation_id: String,
    pub text: String,
    pub produced_at: f64,
    pub context_fingerprint: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseStats {
    pub total_messages: i64,
    pub unconsolidated_messages: i64,
    pub total_chunks: i64,
    pub total_responses: i64,
    pub active_conversations: i64,
    pub database_size_bytes: i64,
}
