//! Memory for a long-running group-chat agent.
//!
//! Raw messages land in a deduplicated log, a background engine compresses
//! old runs of them into summary chunks, and the retriever hands back the
//! chunks still relevant enough for their age alongside the recent tail.

pub mod config;
pub mod consolidation;
pub mod context_engine;
pub mod error;
pub mod import;
pub mod memory_db;
pub mod metrics;
pub mod summarizer;
pub mod telemetry;
pub mod utils;

#[cfg(feature = "cli")]
pub mod api;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

pub use config::MemoryConfig;
pub use consolidation::{ConsolidationEngine, CycleReport, CycleState, SchedulerHandle};
pub use context_engine::{AssembledContext, ContextAssembler, RelevanceRetriever};
pub use error::{StoreError, StoreResult};
pub use import::{read_jsonl, ImportBatch, ImportReport};
pub use memory_db::{AgentResponse, Chunk, DatabaseStats, MemoryDatabase, Message, NewMessage, RankedChunk};
pub use summarizer::{HttpSummarizer, Summarizer};

use consolidation::engine::now_epoch;
use consolidation::{ConsolidationScheduler, SchedulerConfig};

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub database: DatabaseStats,
    pub consolidation_state: CycleState,
    /// Conversations holding at least one chunk
    pub remembered_conversations: Vec<String>,
}

/// The whole memory subsystem, built once at startup and shared by reference
pub struct MemorySystem {
    config: MemoryConfig,
    db: Arc<MemoryDatabase>,
    engine: Arc<ConsolidationEngine>,
    retriever: Arc<RelevanceRetriever>,
    assembler: ContextAssembler,
}

const SECONDS_PER_DAY: u64 = 86_400;

/// Saturates instead of overflowing for absurd day counts
fn retention_period(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY))
}

impl MemorySystem {
    /// Open the configured database and talk to the configured summarizer endpoint
    pub fn open(config: MemoryConfig) -> anyhow::Result<Self> {
        let db = MemoryDatabase::new(&config.store.db_path, config.store.pool_size, config.ledger.capacity)?;
        let summarizer = HttpSummarizer::new(&config.summarizer)?;
        Ok(Self::new(config, Arc::new(db), Arc::new(summarizer)))
    }

    pub fn new(config: MemoryConfig, db: Arc<MemoryDatabase>, summarizer: Arc<dyn Summarizer>) -> Self {
        let engine = Arc::new(ConsolidationEngine::new(
            Arc::clone(&db),
            summarizer,
            config.consolidation.clone(),
        ));
        let retriever = Arc::new(RelevanceRetriever::new(Arc::clone(&db), config.retrieval.clone()));
        let assembler = ContextAssembler::new(Arc::clone(&db), Arc::clone(&retriever), config.assembler.clone());
        Self { config, db, engine, retriever, assembler }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }

    pub fn engine(&self) -> &Arc<ConsolidationEngine> {
        &self.engine
    }

    pub fn retriever(&self) -> &Arc<RelevanceRetriever> {
        &self.retriever
    }

    /// Store an inbound message; `timestamp` defaults to now. Returns `false` for a duplicate.
    pub fn append(&self, conversation_id: &str, author_id: &str, text: &str, timestamp: Option<f64>) -> StoreResult<bool> {
        let inserted = self
            .db
            .messages
            .append(conversation_id, author_id, text, timestamp.unwrap_or_else(now_epoch))?;
        metrics::inc_message(inserted);
        Ok(inserted)
    }

    pub fn tail(&self, conversation_id: &str, limit: usize) -> StoreResult<Vec<Message>> {
        self.db.messages.tail(conversation_id, limit)
    }

    pub fn context(&self, conversation_id: &str, query: &str, context: &str) -> AssembledContext {
        self.assembler.assemble(conversation_id, query, context)
    }

    pub fn record_response(&self, conversation_id: &str, text: &str) -> StoreResult<()> {
        self.db.responses.record(conversation_id, text)
    }

    /// Consolidate everything unconsolidated for one conversation right now
    pub async fn force_consolidate(&self, conversation_id: &str) -> anyhow::Result<CycleReport> {
        self.engine.force_conversation(conversation_id).await
    }

    /// Store a backfill in one transaction, then consolidate every conversation that
    /// gained messages. Consolidation failures are counted, not returned.
    pub async fn import(&self, batch: ImportBatch) -> anyhow::Result<ImportReport> {
        let mut report = ImportReport {
            lines_read: batch.lines_read,
            skipped: batch.skipped,
            ..ImportReport::default()
        };
        let db = Arc::clone(&self.db);
        let (messages, flags) = tokio::task::spawn_blocking(move || {
            let flags = db.messages.append_many(&batch.messages)?;
            Ok::<_, StoreError>((batch.messages, flags))
        })
        .await
        .context("import task panicked")?
        .context("storing imported messages")?;

        let mut touched: BTreeMap<&str, usize> = BTreeMap::new();
        for (message, inserted) in messages.iter().zip(&flags) {
            metrics::inc_message(*inserted);
            if *inserted {
                report.inserted += 1;
                *touched.entry(message.conversation_id.as_str()).or_default() += 1;
            } else {
                report.duplicates += 1;
            }
        }
        info!(
            "Imported {} new messages ({} duplicates, {} skipped) across {} conversations",
            report.inserted,
            report.duplicates,
            report.skipped,
            touched.len()
        );

        for conversation_id in touched.keys() {
            match self.consolidate_backlog(conversation_id).await {
                Ok(chunks) => {
                    report.conversations_consolidated += 1;
                    report.chunks_created += chunks;
                }
                Err(e) => {
                    warn!("Consolidation after import failed for {}: {:#}", conversation_id, e);
                    report.consolidation_failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Forced cycles until the per-cycle run limit stops deferring work
    async fn consolidate_backlog(&self, conversation_id: &str) -> anyhow::Result<usize> {
        let mut chunks = 0;
        loop {
            let cycle = self.engine.force_conversation(conversation_id).await?;
            chunks += cycle.chunks_created;
            if cycle.deferred == 0 || cycle.deferred == cycle.runs {
                return Ok(chunks);
            }
        }
    }

    pub fn stats(&self) -> StoreResult<MemoryStats> {
        Ok(MemoryStats {
            database: self.db.stats()?,
            consolidation_state: self.engine.state(),
            remembered_conversations: self.db.chunks.conversations()?,
        })
    }

    pub fn chunk(&self, chunk_id: &str) -> StoreResult<Option<Chunk>> {
        self.db.chunks.get(chunk_id)
    }

    pub fn export(&self, conversation_id: &str) -> StoreResult<String> {
        let chunks = self.db.chunks.for_conversation(conversation_id)?;
        Ok(context_engine::render_conversation_export(conversation_id, &chunks, now_epoch()))
    }

    /// Spawn the background consolidation loop on the current tokio runtime
    pub fn start_scheduler(&self) -> SchedulerHandle {
        let consolidation = &self.config.consolidation;
        let scheduler_config = SchedulerConfig {
            interval: consolidation.interval,
            retention: retention_period(self.config.store.retention_days),
            active_window: consolidation.active_window,
            utc_offset_hours: self.config.retrieval.utc_offset_hours,
        };
        info!("Starting background consolidation");
        ConsolidationScheduler::new(Arc::clone(&self.engine), Arc::clone(&self.db), scheduler_config).start()
    }
}
