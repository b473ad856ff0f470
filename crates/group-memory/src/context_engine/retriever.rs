//! Relevance-decay retrieval over a conversation's chunks
use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use super::time_info::{TimeInfo, TimeOfDay};
use crate::config::RetrievalConfig;
use crate::consolidation::engine::now_epoch;
use crate::error::StoreResult;
use crate::memory_db::{Chunk, MemoryDatabase, RankedChunk};
use crate::utils::keywords::{jaccard, KeywordExtractor};

const SECONDS_PER_DAY: f64 = 86_400.0;
const KEYWORD_WEIGHT: f64 = 0.6;
const SEMANTIC_WEIGHT: f64 = 0.3;
const IMPORTANCE_WEIGHT: f64 = 0.1;
const MAX_TIME_BONUS: f64 = 0.3;
const MAX_CONTEXT_BONUS: f64 = 0.2;

/// Substrings that turn a query into "show me everything you remember"
const MEMORY_QUERY_PHRASES: &[&str] = &[
    "what do you remember",
    "what have you remembered",
    "everything you remember",
    "all you remember",
    "show your memory",
    "show memory",
    "memory dump",
    "what did you save",
    "что помнишь",
    "что запомнил",
    "что знаешь",
    "расскажи что помнишь",
    "покажи память",
    "что в памяти",
    "вся память",
    "все что помнишь",
    "что сохранил",
    "что записал",
    "все знания",
    "вся информация",
    "память",
];

lazy_static! {
    static ref MEMORY_QUERY_PATTERNS: Vec<Regex> = [
        r"bot.*what.*remember",
        r"bot.*show.*memory",
        r"бот.*что.*помнишь",
        r"бот.*что.*запомнил",
        r"бот.*что.*знаешь",
        r"бот.*расскажи.*память",
        r"бот.*покажи.*память",
        r"бот.*вся.*память",
        r"бот.*все.*помнишь",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect();
}

fn time_of_day_keywords(time_of_day: TimeOfDay) -> &'static [&'static str] {
    match time_of_day {
        TimeOfDay::Morning => &["утро", "работа", "планы", "встреча", "morning", "work", "plans", "meeting"],
        TimeOfDay::Afternoon => &["обед", "работа", "проект", "задача", "lunch", "work", "project", "task"],
        TimeOfDay::Evening => &["вечер", "отдых", "планы", "встреча", "evening", "rest", "plans", "meeting"],
        TimeOfDay::Night => &["ночь", "завтра", "поздно", "спать", "night", "tomorrow", "late", "sleep"],
    }
}

const CONTEXT_CATEGORIES: &[&[&str]] = &[
    // work
    &["работа", "проект", "задача", "встреча", "дедлайн", "код", "work", "project", "task", "deadline", "code"],
    // personal
    &["дом", "семья", "друзья", "отдых", "хобби", "home", "family", "friends", "hobby"],
    // plans
    &["планы", "завтра", "встреча", "событие", "напоминание", "plans", "tomorrow", "meeting", "event", "reminder"],
    // problems
    &["проблема", "ошибка", "не работает", "помощь", "вопрос", "problem", "error", "broken", "help", "question"],
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgeDistribution {
    /// ≤ 7 days
    pub fresh: usize,
    /// ≤ 30 days
    pub recent: usize,
    /// ≤ 90 days
    pub old: usize,
    pub ancient: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrieverStats {
    pub total_chunks: usize,
    pub age_distribution: AgeDistribution,
    pub oldest_chunk_days: Option<f64>,
    pub newest_chunk_days: Option<f64>,
    pub avg_base_importance: Option<f64>,
}

pub struct RelevanceRetriever {
    db: Arc<MemoryDatabase>,
    config: RetrievalConfig,
    extractor: KeywordExtractor,
}

impl RelevanceRetriever {
    pub fn new(db: Arc<MemoryDatabase>, config: RetrievalConfig) -> Self {
        Self { db, config, extractor: KeywordExtractor::default() }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn find_relevant(&self, conversation_id: &str, query: &str, context: &str) -> StoreResult<Vec<RankedChunk>> {
        let now = now_epoch();
        self.find_relevant_at(conversation_id, query, context, &TimeInfo::at(now, self.config.utc_offset_hours))
    }

    /// Ranked, admitted chunks best first, capped at `max_results`.
    /// A "show everything remembered" query returns every chunk newest first instead.
    pub fn find_relevant_at(
        &self,
        conversation_id: &str,
        query: &str,
        context: &str,
        time: &TimeInfo,
    ) -> StoreResult<Vec<RankedChunk>> {
        let chunks = self.db.chunks.for_conversation(conversation_id)?;
        if chunks.is_empty() {
            debug!("No chunks stored for conversation {}", conversation_id);
            return Ok(Vec::new());
        }
        let now = time.timestamp;

        if Self::is_memory_query(query) {
            info!(
                "Memory query for {}, returning all {} chunks",
                conversation_id,
                chunks.len()
            );
            let mut all: Vec<RankedChunk> = chunks
                .into_iter()
                .map(|chunk| RankedChunk {
                    age_days: age_days(&chunk, now),
                    chunk,
                    relevance_score: 1.0,
                    admitted: true,
                    time_bonus: 0.0,
                    context_bonus: 0.0,
                })
                .collect();
            all.sort_by(|a, b| b.chunk.created_at.total_cmp(&a.chunk.created_at));
            return Ok(all);
        }

        let query_keywords = self.extractor.extract(query);
        let context_keywords = self.extractor.extract(context);
        let context_lower = context.to_lowercase();
        let total = chunks.len();

        let mut admitted: Vec<RankedChunk> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let text = chunk.searchable_text();
                let relevance = self.relevance(&chunk, &text, &query_keywords, &context_keywords);
                let age = age_days(&chunk, now);
                let threshold = self.config.decay.threshold(age);
                if relevance < threshold {
                    debug!(
                        "Chunk {} below threshold: {:.3} < {:.3} at {:.1} days",
                        chunk.id, relevance, threshold, age
                    );
                    return None;
                }
                Some(RankedChunk {
                    time_bonus: time_bonus(&text, age, time),
                    context_bonus: context_bonus(&text, &context_lower),
                    chunk,
                    relevance_score: relevance,
                    age_days: age,
                    admitted: true,
                })
            })
            .collect();

        admitted.sort_by(|a, b| {
            b.final_score()
                .total_cmp(&a.final_score())
                .then(b.chunk.created_at.total_cmp(&a.chunk.created_at))
        });
        admitted.truncate(self.config.max_results);

        info!(
            "Found {} relevant chunks out of {} for conversation {}",
            admitted.len(),
            total,
            conversation_id
        );
        Ok(admitted)
    }

    /// 0.6 keyword hit rate + 0.3 Jaccard similarity + 0.1 base importance
    fn relevance(
        &self,
        chunk: &Chunk,
        chunk_text: &str,
        query_keywords: &HashSet<String>,
        context_keywords: &HashSet<String>,
    ) -> f64 {
        let total = query_keywords.len() + context_keywords.len();
        let keyword_score = if total == 0 {
            0.0
        } else {
            let hits = query_keywords
                .iter()
                .chain(context_keywords.iter())
                .filter(|keyword| chunk_text.contains(keyword.as_str()))
                .count();
            hits as f64 / total as f64
        };
        let semantic_score = jaccard(query_keywords, &self.extractor.extract(chunk_text));

        KEYWORD_WEIGHT * keyword_score + SEMANTIC_WEIGHT * semantic_score + IMPORTANCE_WEIGHT * chunk.base_importance
    }

    pub fn is_memory_query(query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }
        MEMORY_QUERY_PHRASES.iter().any(|phrase| query.contains(phrase))
            || MEMORY_QUERY_PATTERNS.iter().any(|re| re.is_match(&query))
    }

    pub fn stats(&self, conversation_id: &str) -> StoreResult<RetrieverStats> {
        self.stats_at(conversation_id, now_epoch())
    }

    pub fn stats_at(&self, conversation_id: &str, now: f64) -> StoreResult<RetrieverStats> {
        let chunks = self.db.chunks.for_conversation(conversation_id)?;
        if chunks.is_empty() {
            return Ok(RetrieverStats::default());
        }

        let mut stats = RetrieverStats { total_chunks: chunks.len(), ..RetrieverStats::default() };
        let mut importance_sum = 0.0;
        for chunk in &chunks {
            let age = age_days(chunk, now);
            match age {
                a if a <= 7.0 => stats.age_distribution.fresh += 1,
                a if a <= 30.0 => stats.age_distribution.recent += 1,
                a if a <= 90.0 => stats.age_distribution.old += 1,
                _ => stats.age_distribution.ancient += 1,
            }
            stats.oldest_chunk_days = Some(stats.oldest_chunk_days.map_or(age, |o| o.max(age)));
            stats.newest_chunk_days = Some(stats.newest_chunk_days.map_or(age, |n| n.min(age)));
            importance_sum += chunk.base_importance;
        }
        stats.avg_base_importance = Some(importance_sum / chunks.len() as f64);
        Ok(stats)
    }
}

fn age_days(chunk: &Chunk, now: f64) -> f64 {
    ((now - chunk.created_at) / SECONDS_PER_DAY).max(0.0)
}

/// +0.1 per time-of-day keyword in the chunk, +0.05 for a chunk under a day old
/// during working hours; capped at 0.3
fn time_bonus(chunk_text: &str, age_days: f64, time: &TimeInfo) -> f64 {
    let mut bonus = time_of_day_keywords(time.time_of_day)
        .iter()
        .filter(|keyword| chunk_text.contains(*keyword))
        .count() as f64
        * 0.1;
    if (9..18).contains(&time.hour) && age_days < 1.0 {
        bonus += 0.05;
    }
    bonus.min(MAX_TIME_BONUS)
}

/// +0.1 per shared keyword in each category the context and chunk both touch; capped at 0.2
fn context_bonus(chunk_text: &str, context_lower: &str) -> f64 {
    if context_lower.trim().is_empty() {
        return 0.0;
    }
    let bonus: f64 = CONTEXT_CATEGORIES
        .iter()
        .map(|keywords| {
            let in_context = keywords.iter().filter(|kw| context_lower.contains(*kw)).count();
            let in_chunk = keywords.iter().filter(|kw| chunk_text.contains(*kw)).count();
            0.1 * in_context.min(in_chunk) as f64
        })
        .sum();
    bonus.min(MAX_CONTEXT_BONUS)
}
