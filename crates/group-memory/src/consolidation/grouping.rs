//! Splitting a backlog of messages into per-conversation runs separated by silence
use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;

use crate::memory_db::Message;
use crate::utils::TextUtils;

/// A maximal, time-ordered sequence of one conversation's messages with no
/// internal gap above the configured maximum. Never empty.
#[derive(Debug, Clone)]
pub struct MessageRun {
    pub conversation_id: String,
    pub messages: Vec<Message>,
}

impl MessageRun {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn window_start(&self) -> f64 {
        self.messages.first().map(|m| m.received_at).unwrap_or_default()
    }

    pub fn window_end(&self) -> f64 {
        self.messages.last().map(|m| m.received_at).unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.messages.iter().map(|m| m.id).collect()
    }

    /// Distinct authors, sorted
    pub fn participants(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|m| m.author_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// One line per message: `[HH:MM] abcd: text`, times in UTC
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let clock = DateTime::from_timestamp(m.received_at as i64, 0)
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_else(|| "--:--".to_string());
                format!("[{}] {}: {}", clock, TextUtils::short_author(&m.author_id), m.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Bucket a flat backlog by conversation. Keys iterate in sorted order.
pub fn group_by_conversation(messages: Vec<Message>) -> BTreeMap<String, Vec<Message>> {
    let mut grouped: BTreeMap<String, Vec<Message>> = BTreeMap::new();
    for message in messages {
        grouped.entry(message.conversation_id.clone()).or_default().push(message);
    }
    grouped
}

/// Sort one conversation's messages by time and cut wherever consecutive
/// messages are more than `max_gap_secs` apart.
pub fn split_by_gap(conversation_id: &str, mut messages: Vec<Message>, max_gap_secs: f64) -> Vec<MessageRun> {
    messages.sort_by(|a, b| a.received_at.total_cmp(&b.received_at).then(a.id.cmp(&b.id)));

    let mut runs = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    for message in messages {
        if let Some(last) = current.last() {
            if message.received_at - last.received_at > max_gap_secs {
                runs.push(MessageRun {
                    conversation_id: conversation_id.to_string(),
                    messages: std::mem::take(&mut current),
                });
            }
        }
        current.push(message);
    }
    if !current.is_empty() {
        runs.push(MessageRun { conversation_id: conversation_id.to_string(), messages: current });
    }
    runs
}

/// Conversation grouping followed by gap splitting, conversations in sorted order
pub fn build_runs(messages: Vec<Message>, max_gap_secs: f64) -> Vec<MessageRun> {
    group_by_conversation(messages)
        .into_iter()
        .flat_map(|(conversation_id, messages)| split_by_gap(&conversation_id, messages, max_gap_secs))
        .collect()
}
