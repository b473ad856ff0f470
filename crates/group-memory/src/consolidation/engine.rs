//! Consolidation engine: turns runs of old, unconsolidated messages into chunks.
//!
//! One cycle walks `Idle -> Selecting -> Grouping -> Summarizing -> Persisting -> Idle`.
//! Run-level faults are recovered inside the cycle; only a failed selection
//! aborts it, and the engine is back in `Idle` either way.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::grouping::{build_runs, MessageRun};
use super::summary_parser::{parse_summary, ParseOutcome};
use crate::config::ConsolidationConfig;
use crate::error::StoreResult;
use crate::memory_db::{Chunk, MemoryDatabase};
use crate::metrics;
use crate::summarizer::Summarizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Selecting,
    Grouping,
    Summarizing,
    Persisting,
}

impl CycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CycleState::Selecting,
            2 => CycleState::Grouping,
            3 => CycleState::Summarizing,
            4 => CycleState::Persisting,
            _ => CycleState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    Scheduled,
    Forced,
}

impl CycleMode {
    fn label(self) -> &'static str {
        match self {
            CycleMode::Scheduled => "scheduled",
            CycleMode::Forced => "forced",
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub selected: usize,
    pub runs: usize,
    pub chunks_created: usize,
    /// Summarized again after an interrupted mark; the chunk was already on disk
    pub already_stored: usize,
    pub discarded_short: usize,
    /// Summarizer error, timeout or unparseable output
    pub dropped_failed: usize,
    /// Left for a later cycle by the per-cycle run limit
    pub deferred: usize,
    pub persist_failures: usize,
    pub mark_failures: usize,
}

enum RunOutcome {
    Chunked,
    AlreadyStored,
    Short,
    Dropped,
    PersistFailed,
    MarkFailed,
}

pub struct ConsolidationEngine {
    db: Arc<MemoryDatabase>,
    summarizer: Arc<dyn Summarizer>,
    config: ConsolidationConfig,
    cycle_guard: Mutex<()>,
    state: AtomicU8,
}

impl ConsolidationEngine {
    pub fn new(db: Arc<MemoryDatabase>, summarizer: Arc<dyn Summarizer>, config: ConsolidationConfig) -> Self {
        Self {
            db,
            summarizer,
            config,
            cycle_guard: Mutex::new(()),
            state: AtomicU8::new(CycleState::Idle as u8),
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn state(&self) -> CycleState {
        CycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn enter(&self, state: CycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub async fn run_cycle(&self) -> anyhow::Result<Option<CycleReport>> {
        self.run_cycle_at(now_epoch()).await
    }

    /// Scheduled cycle across every conversation. Returns `Ok(None)` without doing
    /// anything when another cycle on this engine is still in progress.
    pub async fn run_cycle_at(&self, now: f64) -> anyhow::Result<Option<CycleReport>> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            debug!("Consolidation cycle already running, skipping tick");
            metrics::inc_cycle("skipped");
            return Ok(None);
        };
        let cutoff = now - self.config.safety_margin.as_secs_f64();
        self.execute(None, cutoff, now, CycleMode::Scheduled).await.map(Some)
    }

    pub async fn force_conversation(&self, conversation_id: &str) -> anyhow::Result<CycleReport> {
        self.force_conversation_at(conversation_id, now_epoch()).await
    }

    /// On-demand cycle for one conversation. Waits for a running cycle to finish,
    /// then consolidates everything already received, ignoring the safety margin.
    pub async fn force_conversation_at(&self, conversation_id: &str, now: f64) -> anyhow::Result<CycleReport> {
        let _guard = self.cycle_guard.lock().await;
        info!("Forced consolidation requested for conversation {}", conversation_id);
        self.execute(Some(conversation_id), now, now, CycleMode::Forced).await
    }

    async fn execute(
        &self,
        scope: Option<&str>,
        cutoff: f64,
        now: f64,
        mode: CycleMode,
    ) -> anyhow::Result<CycleReport> {
        let started = Instant::now();
        metrics::set_cycle_running(true);
        let result = self.execute_inner(scope, cutoff, now, mode).await;
        self.enter(CycleState::Idle);
        metrics::set_cycle_running(false);
        metrics::observe_cycle(started.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                metrics::inc_cycle("completed");
                if report.selected > 0 {
                    info!(
                        "Consolidation cycle ({}) done in {:?}: {} messages, {} runs, {} chunks ({} already stored), {} short, {} dropped, {} deferred, {} store failures",
                        mode.label(),
                        started.elapsed(),
                        report.selected,
                        report.runs,
                        report.chunks_created,
                        report.already_stored,
                        report.discarded_short,
                        report.dropped_failed,
                        report.deferred,
                        report.persist_failures + report.mark_failures
                    );
                } else {
                    debug!("Consolidation cycle ({}): nothing to consolidate", mode.label());
                }
            }
            Err(e) => {
                metrics::inc_cycle("error");
                error!("Consolidation cycle ({}) aborted: {:#}", mode.label(), e);
            }
        }
        result
    }

    async fn execute_inner(
        &self,
        scope: Option<&str>,
        cutoff: f64,
        now: f64,
        mode: CycleMode,
    ) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();

        self.enter(CycleState::Selecting);
        let scope_owned = scope.map(str::to_string);
        let backlog = self
            .blocking(move |db| db.messages.unconsolidated_older_than(scope_owned.as_deref(), cutoff))
            .await
            .context("selecting unconsolidated messages")?;
        report.selected = backlog.len();
        if backlog.is_empty() {
            return Ok(report);
        }

        self.enter(CycleState::Grouping);
        let runs = build_runs(backlog, self.config.max_time_gap.as_secs_f64());
        report.runs = runs.len();
        debug!("Grouped {} messages into {} runs", report.selected, report.runs);

        let mut summarized = 0usize;
        for (index, run) in runs.iter().enumerate() {
            // Stop at the limit so later runs of a conversation never overtake earlier ones
            if run.len() >= self.config.min_messages_for_chunk && summarized >= self.config.max_runs_per_cycle {
                report.deferred = runs.len() - index;
                info!(
                    "Run limit of {} reached, deferring {} runs to the next cycle",
                    self.config.max_runs_per_cycle, report.deferred
                );
                break;
            }
            if run.len() >= self.config.min_messages_for_chunk {
                summarized += 1;
            }

            match self.consolidate_run(run, now, mode).await {
                RunOutcome::Chunked => report.chunks_created += 1,
                RunOutcome::AlreadyStored => report.already_stored += 1,
                RunOutcome::Short => report.discarded_short += 1,
                RunOutcome::Dropped => report.dropped_failed += 1,
                RunOutcome::PersistFailed => report.persist_failures += 1,
                RunOutcome::MarkFailed => report.mark_failures += 1,
            }
        }
        Ok(report)
    }

    async fn consolidate_run(&self, run: &MessageRun, now: f64, mode: CycleMode) -> RunOutcome {
        if run.len() < self.config.min_messages_for_chunk {
            debug!(
                "Run of {} messages in {} is below the chunk floor, discarding",
                run.len(),
                run.conversation_id
            );
            metrics::inc_run_dropped("short");
            return match self.mark(run).await {
                Ok(()) => RunOutcome::Short,
                Err(()) => RunOutcome::MarkFailed,
            };
        }

        self.enter(CycleState::Summarizing);
        let Some(chunk) = self.summarize_run(run, now).await else {
            metrics::inc_run_dropped("summarizer");
            return match self.mark(run).await {
                Ok(()) => RunOutcome::Dropped,
                Err(()) => RunOutcome::MarkFailed,
            };
        };

        self.enter(CycleState::Persisting);
        let chunk_id = chunk.id.clone();
        let inserted = match self.blocking(move |db| db.chunks.insert(&chunk)).await {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!("Failed to persist chunk {}, run will be retried: {:#}", chunk_id, e);
                return RunOutcome::PersistFailed;
            }
        };
        if self.mark(run).await.is_err() {
            return RunOutcome::MarkFailed;
        }
        if inserted {
            metrics::inc_chunk(mode.label());
            RunOutcome::Chunked
        } else {
            debug!("Chunk {} was already stored by an earlier cycle", chunk_id);
            RunOutcome::AlreadyStored
        }
    }

    /// Ask the summarizer for this run under the hard timeout and build a chunk from
    /// whatever can be recovered. `None` means the run yields no memory.
    async fn summarize_run(&self, run: &MessageRun, now: f64) -> Option<Chunk> {
        let participants = run.participants();
        let transcript = run.transcript();

        let raw = match tokio::time::timeout(
            self.config.summarizer_timeout,
            self.summarizer.summarize(&transcript, &participants),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!("Summarizer failed for run in {}: {:#}", run.conversation_id, e);
                return None;
            }
            Err(_) => {
                warn!(
                    "Summarizer timed out after {:?} for run in {}",
                    self.config.summarizer_timeout, run.conversation_id
                );
                return None;
            }
        };

        let parsed = match parse_summary(&raw) {
            ParseOutcome::Complete(parsed) => parsed,
            ParseOutcome::Partial { summary, defaulted } => {
                warn!("Summary for {} missing {:?}, using placeholders", run.conversation_id, defaulted);
                summary
            }
            ParseOutcome::Unrecoverable => {
                warn!("Unparseable summary for run in {}, dropping it", run.conversation_id);
                return None;
            }
        };

        Some(Chunk {
            id: Chunk::derive_id(&run.conversation_id, run.window_start(), run.len()),
            conversation_id: run.conversation_id.clone(),
            summary: parsed.chunk_summary(),
            topic: parsed.topic,
            created_at: now,
            window_start: run.window_start(),
            window_end: run.window_end(),
            base_importance: parsed.importance,
            message_count: run.len(),
            participant_ids: participants,
        })
    }

    async fn mark(&self, run: &MessageRun) -> Result<(), ()> {
        let ids = run.ids();
        let expected = ids.len();
        match self.blocking(move |db| db.messages.mark_consolidated(&ids)).await {
            Ok(updated) => {
                if updated < expected {
                    debug!("{} of {} messages were already consolidated", expected - updated, expected);
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Failed to mark {} messages of {} consolidated, run will be redone: {:#}",
                    expected, run.conversation_id, e
                );
                Err(())
            }
        }
    }

    async fn blocking<T, F>(&self, op: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MemoryDatabase) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || op(&db))
            .await
            .context("store task panicked")?;
        Ok(result?)
    }
}

pub(crate) fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Replays a fixed reply and counts calls
    struct ScriptedSummarizer {
        reply: Result<String, String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedSummarizer {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), delay: Duration::ZERO, calls: AtomicUsize::new(0) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: Err("boom".to_string()), delay: Duration::ZERO, calls: AtomicUsize::new(0) })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self { reply: Ok(GOOD_REPLY.to_string()), delay, calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(&self, _transcript: &str, _participants: &[String]) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    const GOOD_REPLY: &str = r#"{"topic": "Weekend plans", "summary": "Hiking on Saturday", "importance": 0.8}"#;
    const HOUR: f64 = 3600.0;
    const NOW: f64 = 1_000_000.0;

    fn engine(summarizer: Arc<ScriptedSummarizer>) -> (Arc<MemoryDatabase>, ConsolidationEngine) {
        let db = Arc::new(MemoryDatabase::new_in_memory(5).unwrap());
        let engine = ConsolidationEngine::new(Arc::clone(&db), summarizer, ConsolidationConfig::default());
        (db, engine)
    }

    fn append_run(db: &MemoryDatabase, conversation: &str, start: f64, count: usize) {
        for i in 0..count {
            db.messages
                .append(conversation, &format!("user{}", i % 3), &format!("{} msg {}", conversation, i), start + i as f64 * 60.0)
                .unwrap();
        }
    }

    fn unconsolidated(db: &MemoryDatabase) -> usize {
        db.messages.unconsolidated_older_than(None, f64::MAX).unwrap().len()
    }

    // ===== Scenario Tests =====

    #[tokio::test]
    async fn test_gap_scenario_one_chunk_all_marked() {
        let summarizer = ScriptedSummarizer::replying(GOOD_REPLY);
        let (db, engine) = engine(Arc::clone(&summarizer));
        let start = NOW - 20.0 * HOUR;
        append_run(&db, "C1", start, 8);
        append_run(&db, "C1", start + 600.0 + 7.0 * HOUR, 3);

        let report = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(report.selected, 11);
        assert_eq!(report.runs, 2);
        assert_eq!(report.chunks_created, 1);
        assert_eq!(report.discarded_short, 1);
        assert_eq!(summarizer.calls(), 1);
        assert_eq!(unconsolidated(&db), 0);

        let chunks = db.chunks.for_conversation("C1").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].message_count, 8);
        assert_eq!(chunks[0].window_start, start);
        assert_eq!(chunks[0].window_end, start + 7.0 * 60.0);
        assert_eq!(chunks[0].topic, "Weekend plans");
        assert_eq!(chunks[0].base_importance, 0.8);
        assert_eq!(chunks[0].participant_ids.len(), 3);
        assert_eq!(engine.state(), CycleState::Idle);
    }

    #[tokio::test]
    async fn test_second_cycle_creates_nothing() {
        let (db, engine) = engine(ScriptedSummarizer::replying(GOOD_REPLY));
        append_run(&db, "C1", NOW - 10.0 * HOUR, 6);

        assert_eq!(engine.run_cycle_at(NOW).await.unwrap().unwrap().chunks_created, 1);
        let second = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(second, CycleReport::default());
        assert_eq!(db.chunks.count("C1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_safety_margin_excludes_recent_messages() {
        let (db, engine) = engine(ScriptedSummarizer::replying(GOOD_REPLY));
        append_run(&db, "C1", NOW - 30.0 * 60.0, 6);

        let report = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(report.selected, 0);
        assert_eq!(unconsolidated(&db), 6);
    }

    // ===== Failure Handling =====

    #[tokio::test]
    async fn test_summarizer_failure_marks_without_chunk() {
        let (db, engine) = engine(ScriptedSummarizer::failing());
        append_run(&db, "C1", NOW - 10.0 * HOUR, 6);

        let report = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(report.dropped_failed, 1);
        assert_eq!(report.chunks_created, 0);
        assert_eq!(unconsolidated(&db), 0);
        assert_eq!(db.chunks.count("C1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_output_marks_without_chunk() {
        let (db, engine) = engine(ScriptedSummarizer::replying("sorry, I cannot help with that"));
        append_run(&db, "C1", NOW - 10.0 * HOUR, 6);

        let report = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(report.dropped_failed, 1);
        assert_eq!(unconsolidated(&db), 0);
    }

    #[tokio::test]
    async fn test_partial_output_still_produces_chunk() {
        let (db, engine) = engine(ScriptedSummarizer::replying(r#"Result: {"summary": "they argued", "importance": 9}"#));
        append_run(&db, "C1", NOW - 10.0 * HOUR, 6);

        engine.run_cycle_at(NOW).await.unwrap().unwrap();
        let chunk = &db.chunks.for_conversation("C1").unwrap()[0];
        assert_eq!(chunk.summary, "they argued");
        assert_eq!(chunk.base_importance, 1.0);
        assert!(!chunk.topic.is_empty());
    }

    #[tokio::test]
    async fn test_summarizer_timeout_drops_run() {
        let summarizer = ScriptedSummarizer::slow(Duration::from_secs(30));
        let db = Arc::new(MemoryDatabase::new_in_memory(5).unwrap());
        let config = ConsolidationConfig { summarizer_timeout: Duration::from_millis(100), ..ConsolidationConfig::default() };
        let engine = ConsolidationEngine::new(Arc::clone(&db), summarizer, config);
        append_run(&db, "C1", NOW - 10.0 * HOUR, 6);

        let report = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(report.dropped_failed, 1);
        assert_eq!(unconsolidated(&db), 0);
    }

    // ===== Persist And Mark Ordering =====

    const REJECT_CHUNKS: &str = "CREATE TRIGGER reject_chunks BEFORE INSERT ON chunks
         BEGIN SELECT RAISE(ABORT, 'chunk write rejected'); END;";
    const REJECT_MARKS: &str = "CREATE TRIGGER reject_marks BEFORE UPDATE ON messages
         BEGIN SELECT RAISE(ABORT, 'mark rejected'); END;";

    #[tokio::test]
    async fn test_failed_persist_leaves_run_for_next_cycle() {
        let summarizer = ScriptedSummarizer::replying(GOOD_REPLY);
        let (db, engine) = engine(Arc::clone(&summarizer));
        append_run(&db, "C1", NOW - 10.0 * HOUR, 6);
        db.execute_raw(REJECT_CHUNKS).unwrap();

        let failed = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(failed.persist_failures, 1);
        assert_eq!(failed.chunks_created, 0);
        assert_eq!(unconsolidated(&db), 6);
        assert_eq!(db.chunks.count("C1").unwrap(), 0);
        assert_eq!(engine.state(), CycleState::Idle);

        db.execute_raw("DROP TRIGGER reject_chunks").unwrap();
        let retried = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(retried.selected, 6);
        assert_eq!(retried.chunks_created, 1);
        assert_eq!(retried.persist_failures, 0);
        assert_eq!(unconsolidated(&db), 0);
        assert_eq!(db.chunks.count("C1").unwrap(), 1);
        assert_eq!(summarizer.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_mark_is_redone_without_duplicate_chunk() {
        let (db, engine) = engine(ScriptedSummarizer::replying(GOOD_REPLY));
        append_run(&db, "C1", NOW - 10.0 * HOUR, 6);
        db.execute_raw(REJECT_MARKS).unwrap();

        let failed = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(failed.mark_failures, 1);
        assert_eq!(failed.chunks_created, 0);
        assert_eq!(db.chunks.count("C1").unwrap(), 1);
        assert_eq!(unconsolidated(&db), 6);

        db.execute_raw("DROP TRIGGER reject_marks").unwrap();
        let redone = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(redone.already_stored, 1);
        assert_eq!(redone.chunks_created, 0);
        assert_eq!(redone.mark_failures, 0);
        assert_eq!(unconsolidated(&db), 0);
        assert_eq!(db.chunks.count("C1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forced_rerun_over_stored_window_changes_nothing() {
        let (db, engine) = engine(ScriptedSummarizer::replying(GOOD_REPLY));
        append_run(&db, "C1", NOW - 600.0, 5);
        db.execute_raw(REJECT_MARKS).unwrap();

        let failed = engine.force_conversation_at("C1", NOW).await.unwrap();
        assert_eq!(failed.mark_failures, 1);
        let stored = db.chunks.for_conversation("C1").unwrap();
        assert_eq!(stored.len(), 1);

        // Same window, later clock: the derived id matches and the stored row is kept as is
        db.execute_raw("DROP TRIGGER reject_marks").unwrap();
        let rerun = engine.force_conversation_at("C1", NOW + HOUR).await.unwrap();
        assert_eq!(rerun.already_stored, 1);
        assert_eq!(rerun.chunks_created, 0);
        assert_eq!(db.chunks.for_conversation("C1").unwrap(), stored);
        assert_eq!(unconsolidated(&db), 0);

        let again = engine.force_conversation_at("C1", NOW + 2.0 * HOUR).await.unwrap();
        assert_eq!(again, CycleReport::default());
        assert_eq!(db.chunks.count("C1").unwrap(), 1);
    }

    // ===== Rate Limit =====

    #[tokio::test]
    async fn test_run_limit_defers_remaining_runs() {
        let summarizer = ScriptedSummarizer::replying(GOOD_REPLY);
        let (db, engine) = engine(Arc::clone(&summarizer));
        for i in 0..7 {
            append_run(&db, "C1", NOW - 100.0 * HOUR + i as f64 * 10.0 * HOUR, 5);
        }

        let first = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(first.runs, 7);
        assert_eq!(first.chunks_created, 5);
        assert_eq!(first.deferred, 2);
        assert_eq!(unconsolidated(&db), 10);

        let second = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(second.chunks_created, 2);
        assert_eq!(second.deferred, 0);
        assert_eq!(unconsolidated(&db), 0);
        assert_eq!(summarizer.calls(), 7);
    }

    #[tokio::test]
    async fn test_short_runs_do_not_consume_the_limit() {
        let summarizer = ScriptedSummarizer::replying(GOOD_REPLY);
        let (db, engine) = engine(Arc::clone(&summarizer));
        for i in 0..8 {
            append_run(&db, "C1", NOW - 100.0 * HOUR + i as f64 * 10.0 * HOUR, 2);
        }

        let report = engine.run_cycle_at(NOW).await.unwrap().unwrap();
        assert_eq!(report.discarded_short, 8);
        assert_eq!(report.deferred, 0);
        assert_eq!(summarizer.calls(), 0);
        assert_eq!(unconsolidated(&db), 0);
    }

    // ===== Forced Mode =====

    #[tokio::test]
    async fn test_force_is_scoped_and_ignores_margin() {
        let (db, engine) = engine(ScriptedSummarizer::replying(GOOD_REPLY));
        append_run(&db, "C1", NOW - 600.0, 5);
        append_run(&db, "C2", NOW - 10.0 * HOUR, 5);

        let report = engine.force_conversation_at("C1", NOW).await.unwrap();
        assert_eq!(report.chunks_created, 1);
        assert_eq!(db.chunks.count("C1").unwrap(), 1);
        assert_eq!(db.chunks.count("C2").unwrap(), 0);
        assert_eq!(db.messages.unconsolidated_older_than(Some("C2"), f64::MAX).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_scheduled_tick_skipped_while_cycle_runs() {
        let (_db, engine) = engine(ScriptedSummarizer::replying(GOOD_REPLY));
        let _held = engine.cycle_guard.lock().await;
        assert!(engine.run_cycle_at(NOW).await.unwrap().is_none());
    }

    #[test]
    fn test_cycle_state_roundtrip() {
        for state in [
            CycleState::Idle,
            CycleState::Selecting,
            CycleState::Grouping,
            CycleState::Summarizing,
            CycleState::Persisting,
        ] {
            assert_eq!(CycleState::from_u8(state as u8), state);
        }
    }
}
