//! Long-running pieces around the digest engine: the language-model
//! analyzer and the cron-driven scheduler.

pub mod analyzer;
pub mod scheduler;

pub use analyzer::{LlmAnalyzer, SYSTEM_PROMPT, parse_analysis_reply};
pub use scheduler::{ScheduledJob, Scheduler, jobs_from_config};
