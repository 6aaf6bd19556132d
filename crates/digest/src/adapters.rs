//! Seams to the chat platform, the language model and the wall clock.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AnalysisError;
use crate::message::{Message, RangeStats, Ts};
use crate::schema::AnalysisReply;

/// One page of channel history.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    /// Opaque continuation token; `None` (or empty) ends pagination.
    pub next_cursor: Option<String>,
}

/// Paginated access to a channel's history.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Fetch one page of messages strictly newer than `oldest` (all history
    /// when `None`), continuing from `cursor` when given.
    async fn fetch_page(&self, oldest: Option<Ts>, cursor: Option<&str>) -> Result<HistoryPage>;
}

/// Author lookup used to enrich messages.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Result<String>;
}

/// The language-model call that turns a transcript into a digest.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        formatted_segments: &str,
        stats: &RangeStats,
        meets_threshold: bool,
    ) -> Result<AnalysisReply, AnalysisError>;
}

/// Where a manual run was requested from, for the acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerContext {
    pub channel: String,
    /// Message to thread the acknowledgement under.
    pub thread_ts: Option<String>,
    pub requested_by: Option<String>,
}

/// Outbound messages.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, text: &str) -> Result<()>;

    /// Quick feedback that a requested run has started.
    async fn acknowledge(&self, context: &TriggerContext, text: &str) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
