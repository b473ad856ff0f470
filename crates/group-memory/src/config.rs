// crates/group-memory/src/config.rs

use anyhow::{bail, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::context_engine::decay::DecaySchedule;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub pool_size: u32,
    /// Consolidated messages older than this are removed by the retention sweep
    pub retention_days: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/group_memory.db"),
            pool_size: 8,
            retention_days: 30,
        }
    }
}

/// Hours of the day (local to `utc_offset_hours`) during which scheduled cycles may run.
/// `start > end` wraps past midnight, so `23-7` means 23:00 through 06:59.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ActiveWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl FromStr for ActiveWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('-')
            .with_context(|| format!("active window '{}' must look like START-END", s))?;
        let start_hour: u32 = start.trim().parse().context("invalid window start hour")?;
        let end_hour: u32 = end.trim().parse().context("invalid window end hour")?;
        if start_hour > 23 || end_hour > 23 || start_hour == end_hour {
            bail!("active window '{}' needs two distinct hours in 0..=23", s);
        }
        Ok(Self { start_hour, end_hour })
    }
}

#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub interval: Duration,
    /// Messages newer than `now - safety_margin` are never selected
    pub safety_margin: Duration,
    pub max_time_gap: Duration,
    pub min_messages_for_chunk: usize,
    pub max_runs_per_cycle: usize,
    pub summarizer_timeout: Duration,
    pub active_window: Option<ActiveWindow>,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800),
            safety_margin: Duration::from_secs(3600),
            max_time_gap: Duration::from_secs(6 * 3600),
            min_messages_for_chunk: 5,
            max_runs_per_cycle: 5,
            summarizer_timeout: Duration::from_secs(60),
            active_window: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            model: "local-llm".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub max_results: usize,
    /// Offset applied to UTC when deciding the time-of-day bucket
    pub utc_offset_hours: i32,
    pub decay: DecaySchedule,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            utc_offset_hours: 0,
            decay: DecaySchedule::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { capacity: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub message_tail: usize,
    pub response_tail: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self { message_tail: 15, response_tail: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub store: StoreConfig,
    pub consolidation: ConsolidationConfig,
    pub summarizer: SummarizerConfig,
    pub retrieval: RetrievalConfig,
    pub ledger: LedgerConfig,
    pub assembler: AssemblerConfig,
    pub api_host: String,
    pub api_port: u16,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            consolidation: ConsolidationConfig::default(),
            summarizer: SummarizerConfig::default(),
            retrieval: RetrievalConfig::default(),
            ledger: LedgerConfig::default(),
            assembler: AssemblerConfig::default(),
            api_host: "127.0.0.1".to_string(),
            api_port: 8000,
        }
    }
}

/// Negative and NaN hours clamp to zero; infinite or oversized values are rejected
fn hours_to_duration(key: &str, hours: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(hours.max(0.0) * 3600.0)
        .with_context(|| format!("{} is out of range: {}", key, hours))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value '{}'", key, raw)),
        _ => Ok(default),
    }
}

impl MemoryConfig {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        let config = Self::from_current_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read the process environment only, falling back to defaults for unset keys
    pub fn from_current_env() -> Result<Self> {
        let defaults = Self::default();

        let active_window = match env::var("CONSOLIDATION_WINDOW") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.parse::<ActiveWindow>()?),
            _ => None,
        };

        Ok(Self {
            store: StoreConfig {
                db_path: env::var("MEMORY_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.store.db_path),
                pool_size: env_or("MEMORY_POOL_SIZE", defaults.store.pool_size)?,
                retention_days: env_or("MESSAGE_RETENTION_DAYS", defaults.store.retention_days)?,
            },
            consolidation: ConsolidationConfig {
                interval: Duration::from_secs(env_or("CONSOLIDATION_INTERVAL_SECONDS", 1800u64)?),
                safety_margin: Duration::from_secs(env_or("CONSOLIDATION_SAFETY_MARGIN_SECONDS", 3600u64)?),
                max_time_gap: hours_to_duration(
                    "CONSOLIDATION_MAX_GAP_HOURS",
                    env_or("CONSOLIDATION_MAX_GAP_HOURS", 6.0f64)?,
                )?,
                min_messages_for_chunk: env_or(
                    "CONSOLIDATION_MIN_MESSAGES",
                    defaults.consolidation.min_messages_for_chunk,
                )?,
                max_runs_per_cycle: env_or(
                    "CONSOLIDATION_MAX_RUNS_PER_CYCLE",
                    defaults.consolidation.max_runs_per_cycle,
                )?,
                summarizer_timeout: Duration::from_secs(env_or("SUMMARIZER_TIMEOUT_SECONDS", 60u64)?),
                active_window,
            },
            summarizer: SummarizerConfig {
                base_url: env::var("SUMMARIZER_URL").unwrap_or(defaults.summarizer.base_url),
                model: env::var("SUMMARIZER_MODEL").unwrap_or(defaults.summarizer.model),
                api_key: env::var("SUMMARIZER_API_KEY").ok().filter(|k| !k.is_empty()),
            },
            retrieval: RetrievalConfig {
                max_results: env_or("RETRIEVAL_MAX_RESULTS", defaults.retrieval.max_results)?,
                utc_offset_hours: env_or("RETRIEVAL_UTC_OFFSET_HOURS", defaults.retrieval.utc_offset_hours)?,
                decay: defaults.retrieval.decay,
            },
            ledger: LedgerConfig {
                capacity: env_or("LEDGER_CAPACITY", defaults.ledger.capacity)?,
            },
            assembler: AssemblerConfig {
                message_tail: env_or("ASSEMBLER_MESSAGE_TAIL", defaults.assembler.message_tail)?,
                response_tail: env_or("ASSEMBLER_RESPONSE_TAIL", defaults.assembler.response_tail)?,
            },
            api_host: env::var("API_HOST").unwrap_or(defaults.api_host),
            api_port: env_or("API_PORT", defaults.api_port)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            bail!("MEMORY_POOL_SIZE must be at least 1");
        }
        if self.consolidation.interval.is_zero() {
            bail!("CONSOLIDATION_INTERVAL_SECONDS must be positive");
        }
        if self.consolidation.min_messages_for_chunk == 0 {
            bail!("CONSOLIDATION_MIN_MESSAGES must be at least 1");
        }
        if self.consolidation.max_runs_per_cycle == 0 {
            bail!("CONSOLIDATION_MAX_RUNS_PER_CYCLE must be at least 1");
        }
        if self.consolidation.summarizer_timeout.is_zero() {
            bail!("SUMMARIZER_TIMEOUT_SECONDS must be positive");
        }
        if self.retrieval.max_results == 0 {
            bail!("RETRIEVAL_MAX_RESULTS must be at least 1");
        }
        if !(-12..=14).contains(&self.retrieval.utc_offset_hours) {
            bail!("RETRIEVAL_UTC_OFFSET_HOURS must be between -12 and 14");
        }
        if self.ledger.capacity == 0 {
            bail!("LEDGER_CAPACITY must be at least 1");
        }
        self.retrieval.decay.validate()?;
        Ok(())
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.store.db_path.display());
        info!("- Pool Size: {}", self.store.pool_size);
        info!("- Retention: {} days", self.store.retention_days);
        info!("- Consolidation Interval: {}s", self.consolidation.interval.as_secs());
        info!("- Safety Margin: {}s", self.consolidation.safety_margin.as_secs());
        info!("- Max Gap: {}s", self.consolidation.max_time_gap.as_secs());
        info!("- Min Messages/Chunk: {}", self.consolidation.min_messages_for_chunk);
        info!("- Max Runs/Cycle: {}", self.consolidation.max_runs_per_cycle);
        match self.consolidation.active_window {
            Some(w) => info!("- Active Window: {:02}:00-{:02}:00", w.start_hour, w.end_hour),
            None => info!("- Active Window: always"),
        }
        info!("- Summarizer: {} ({})", self.summarizer.base_url, self.summarizer.model);
        info!("- Ledger Capacity: {}", self.ledger.capacity);
        info!("- API: {}:{}", self.api_host, self.api_port);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("invalid API address {}:{}", self.api_host, self.api_port))
    }
}
