//! Context engine module - retrieval, assembly and rendering of remembered context

pub mod assembler;
pub mod decay;
pub mod export;
pub mod retriever;
pub mod time_info;

pub use assembler::{AssembledContext, ContextAssembler};
pub use decay::{decay_threshold, DecaySchedule};
pub use export::render_conversation_export;
pub use retriever::{AgeDistribution, RelevanceRetriever, RetrieverStats};
pub use time_info::{TimeInfo, TimeOfDay};
