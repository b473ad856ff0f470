//! Background compression of raw message history into chunks
pub mod engine;
pub mod grouping;
pub mod scheduler;
pub mod summary_parser;

pub use engine::{ConsolidationEngine, CycleMode, CycleReport, CycleState};
pub use grouping::MessageRun;
pub use scheduler::{ConsolidationScheduler, SchedulerConfig, SchedulerHandle};
pub use summary_parser::{parse_summary, ParseOutcome, ParsedSummary};
