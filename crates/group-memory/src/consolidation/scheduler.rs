//! Background loop that drives the consolidation engine on a fixed interval
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{FixedOffset, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::engine::{now_epoch, ConsolidationEngine};
use crate::config::ActiveWindow;
use crate::memory_db::MemoryDatabase;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub retention: Duration,
    pub active_window: Option<ActiveWindow>,
    pub utc_offset_hours: i32,
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the loop to stop and wait for it. A cycle in progress runs to completion first.
    pub async fn stop(self) -> anyhow::Result<()> {
        // Send fails only when the loop has already exited
        let _ = self.stop_tx.send(true);
        self.task
            .await
            .map_err(|e| anyhow!("Consolidation scheduler task failed: {}", e))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct ConsolidationScheduler {
    engine: Arc<ConsolidationEngine>,
    db: Arc<MemoryDatabase>,
    config: SchedulerConfig,
}

impl ConsolidationScheduler {
    pub fn new(engine: Arc<ConsolidationEngine>, db: Arc<MemoryDatabase>, config: SchedulerConfig) -> Self {
        Self { engine, db, config }
    }

    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run_loop(stop_rx));
        SchedulerHandle { stop_tx, task }
    }

    async fn run_loop(self, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        // A cycle that overruns the interval swallows the ticks it missed
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Consolidation scheduler started (interval={}s, window={:?})",
            self.config.interval.as_secs(),
            self.config.active_window
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Consolidation scheduler stopped");
    }

    async fn tick(&self) {
        if let Some(window) = self.config.active_window {
            let hour = local_hour(self.config.utc_offset_hours);
            if !window.contains(hour) {
                debug!("Hour {} is outside the consolidation window, skipping", hour);
                return;
            }
        }

        match self.engine.run_cycle().await {
            Ok(Some(_)) => {}
            Ok(None) => debug!("Previous consolidation cycle still running"),
            Err(e) => error!("Consolidation cycle failed, will retry next tick: {:#}", e),
        }

        self.sweep().await;
    }

    async fn sweep(&self) {
        if self.config.retention.is_zero() {
            return;
        }
        let cutoff = now_epoch() - self.config.retention.as_secs_f64();
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || db.messages.sweep_consolidated_before(cutoff)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(deleted)) => info!("Retention sweep deleted {} consolidated messages", deleted),
            Ok(Err(e)) => warn!("Retention sweep failed: {}", e),
            Err(e) => warn!("Retention sweep task failed: {}", e),
        }
    }
}

pub(crate) fn local_hour(utc_offset_hours: i32) -> u32 {
    match FixedOffset::east_opt(utc_offset_hours * 3600) {
        Some(offset) => Utc::now().with_timezone(&offset).hour(),
        None => Utc::now().hour(),
    }
}
