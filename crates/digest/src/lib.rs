//! Incremental channel digest engine.
//!
//! A run selects the history not yet covered by a cursor, drops bot and
//! system traffic, splits the rest into conversational segments, gates on
//! minimum evidence, asks an analyzer for a structured digest, publishes it
//! and finally advances the cursor.  The chat platform and the language
//! model sit behind the traits in [`adapters`].

pub mod adapters;
pub mod checkpoint;
pub mod enrich;
pub mod error;
pub mod gate;
pub mod message;
pub mod orchestrator;
pub mod render;
pub mod schema;
pub mod segment;
pub mod settings;
pub mod trigger;

pub use adapters::{
    Analyzer, Clock, HistoryFetcher, HistoryPage, Publisher, SystemClock, TriggerContext,
    UserDirectory,
};
pub use checkpoint::{CheckpointDocument, CheckpointStore, MANUAL_CURSOR, SCHEDULED_CURSOR};
pub use enrich::enrich_messages;
pub use error::{AnalysisError, CheckpointError, DigestError};
pub use gate::{ActivityGate, meets_threshold};
pub use message::{EnrichedMessage, Message, RangeStats, Ts};
pub use orchestrator::{Orchestrator, RunMode, RunReport, RunState};
pub use render::render_digest;
pub use schema::{AnalysisReply, Digest, analysis_schema};
pub use segment::{Segment, format_segments, segment_messages};
pub use settings::{DigestSettings, parse_timezone};
pub use trigger::{CronTrigger, Trigger};
