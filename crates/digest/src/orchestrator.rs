//! One digest run: fetch, enrich, gate, segment, analyze, publish, advance.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    Analyzer, Clock, HistoryFetcher, Publisher, SystemClock, TriggerContext, UserDirectory,
};
use crate::checkpoint::{CheckpointStore, MANUAL_CURSOR, SCHEDULED_CURSOR, format_timestamp};
use crate::enrich::enrich_messages;
use crate::error::{AnalysisError, DigestError};
use crate::gate::ActivityGate;
use crate::message::{Message, RangeStats, Ts};
use crate::render::render_digest;
use crate::schema::{ANALYSIS_ERROR_REASON, Digest, NO_ACTIVITY_REASON};
use crate::segment::{format_segments, segment_messages};
use crate::settings::DigestSettings;

/// Text posted in reply to a manual request before the run starts.
pub const ACKNOWLEDGEMENT: &str = "Generating a channel summary, this may take a moment…";

/// Lock key for fixed-window runs, which own no cursor.
const WINDOW_KEY: &str = "window";

/// What kind of run to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Covers history after `cursor` and advances it.
    Scheduled { cursor: String },
    /// Covers history after the later of the scheduled and manual cursors
    /// and advances only the manual cursor.
    Manual(TriggerContext),
    /// Covers the configured lookback window; no cursor is read or written.
    Window,
}

impl RunMode {
    pub fn scheduled() -> Self {
        Self::Scheduled {
            cursor: SCHEDULED_CURSOR.to_string(),
        }
    }

    /// Runs sharing a key never overlap.
    fn lock_key(&self) -> &str {
        match self {
            Self::Scheduled { cursor } => cursor,
            Self::Manual(_) => MANUAL_CURSOR,
            Self::Window => WINDOW_KEY,
        }
    }

    fn write_cursor(&self) -> Option<&str> {
        match self {
            Self::Scheduled { cursor } => Some(cursor),
            Self::Manual(_) => Some(MANUAL_CURSOR),
            Self::Window => None,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled { cursor } => write!(f, "scheduled:{cursor}"),
            Self::Manual(_) => f.write_str("manual"),
            Self::Window => f.write_str("window"),
        }
    }
}

/// Per-run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Empty,
    Gating,
    Insufficient,
    Analyzing,
    Publishing,
    Checkpointing,
    Failed,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    /// Exclusive lower bound of the covered range.
    pub lower_bound: DateTime<Utc>,
    /// `true` when the bound came from a stored cursor rather than the
    /// lookback window.
    pub bound_from_checkpoint: bool,
    /// States visited, starting and ending with [`RunState::Idle`].
    pub states: Vec<RunState>,
    pub digest: Digest,
    pub published: bool,
    /// Cursor value in effect after the run, if a cursor was written.
    pub checkpoint: Option<DateTime<Utc>>,
    pub segments: usize,
}

impl RunReport {
    pub fn final_state(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Idle)
    }

    pub fn visited(&self, state: RunState) -> bool {
        self.states.contains(&state)
    }
}

struct Transitions {
    mode: String,
    states: Vec<RunState>,
}

impl Transitions {
    fn new(mode: &RunMode) -> Self {
        Self {
            mode: mode.to_string(),
            states: vec![RunState::Idle],
        }
    }

    fn enter(&mut self, state: RunState) {
        debug!(mode = %self.mode, ?state, "digest run state");
        self.states.push(state);
    }
}

/// Drives digest runs against a set of adapters.
///
/// Runs for the same cursor are serialized through a claim file next to the
/// checkpoint document, so the guarantee holds across processes sharing it:
/// a second request while one is in flight fails fast with
/// [`DigestError::RunInProgress`].  Runs for different cursors may overlap.
pub struct Orchestrator {
    fetcher: Arc<dyn HistoryFetcher>,
    directory: Arc<dyn UserDirectory>,
    analyzer: Arc<dyn Analyzer>,
    publisher: Arc<dyn Publisher>,
    store: CheckpointStore,
    settings: DigestSettings,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn HistoryFetcher>,
        directory: Arc<dyn UserDirectory>,
        analyzer: Arc<dyn Analyzer>,
        publisher: Arc<dyn Publisher>,
        store: CheckpointStore,
        settings: DigestSettings,
    ) -> Self {
        Self {
            fetcher,
            directory,
            analyzer,
            publisher,
            store,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &DigestSettings {
        &self.settings
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub async fn run_scheduled(&self, cursor: &str) -> Result<RunReport, DigestError> {
        self.run(&RunMode::Scheduled {
            cursor: cursor.to_string(),
        })
        .await
    }

    pub async fn run_manual(&self, context: TriggerContext) -> Result<RunReport, DigestError> {
        self.run(&RunMode::Manual(context)).await
    }

    pub async fn run_window(&self) -> Result<RunReport, DigestError> {
        self.run(&RunMode::Window).await
    }

    /// Execute one run.  On error nothing has been published and no cursor
    /// has moved, except for a checkpoint write failure after publishing.
    #[instrument(skip_all, fields(mode = %mode))]
    pub async fn run(&self, mode: &RunMode) -> Result<RunReport, DigestError> {
        let Some(_claim) = self.store.try_claim(mode.lock_key())? else {
            warn!(mode = %mode, "digest run already in progress, request rejected");
            return Err(DigestError::RunInProgress(mode.lock_key().to_string()));
        };

        let mut transitions = Transitions::new(mode);
        match self.execute(mode, &mut transitions).await {
            Ok(report) => Ok(report),
            Err(err) => {
                transitions.enter(RunState::Failed);
                error!(?err, mode = %mode, "digest run failed");
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        mode: &RunMode,
        transitions: &mut Transitions,
    ) -> Result<RunReport, DigestError> {
        // Only a request made from a message gets a reply in its thread.
        if let RunMode::Manual(context @ TriggerContext { thread_ts: Some(_), .. }) = mode {
            if let Err(err) = self.publisher.acknowledge(context, ACKNOWLEDGEMENT).await {
                warn!(?err, channel = %context.channel, "failed to acknowledge manual request");
            }
        }

        let stored = self.stored_bound(mode).await?;
        let started_at = self.clock.now();
        let bound_from_checkpoint = stored.is_some();
        let lower_bound = stored.unwrap_or_else(|| {
            started_at
                .checked_sub_signed(self.settings.lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        });
        info!(
            mode = %mode,
            lower_bound = %format_timestamp(lower_bound),
            from_checkpoint = bound_from_checkpoint,
            "digest run started"
        );

        transitions.enter(RunState::Fetching);
        let oldest = Ts::from_datetime(lower_bound);
        let messages = self.fetch_human_messages(oldest).await?;
        let fetched_at = self.clock.now();
        let stats = RangeStats::from_messages(&messages);

        let mut segments = 0;
        let digest = if stats.message_count == 0 {
            transitions.enter(RunState::Empty);
            Digest::insufficient(NO_ACTIVITY_REASON, stats)
        } else {
            transitions.enter(RunState::Gating);
            let enriched = enrich_messages(self.directory.as_ref(), messages).await;
            let segmented = segment_messages(enriched, self.settings.gap, self.settings.timezone);
            segments = segmented.len();

            let gate = ActivityGate::new(self.settings.min_messages, self.settings.min_unique_users);
            if !gate.passes(&stats) {
                transitions.enter(RunState::Insufficient);
                info!(
                    messages = stats.message_count,
                    users = stats.unique_user_count,
                    "activity below threshold, skipping analysis"
                );
                let reason = gate.shortfall(&stats);
                Digest::insufficient(reason, stats)
            } else {
                transitions.enter(RunState::Analyzing);
                let transcript = format_segments(&segmented);
                match self.analyzer.analyze(&transcript, &stats, true).await {
                    Ok(reply) => Digest::from_analysis(reply, stats, true),
                    Err(AnalysisError::Malformed(reason)) => {
                        warn!(%reason, "analysis reply rejected, publishing insufficient digest");
                        Digest::insufficient(ANALYSIS_ERROR_REASON, stats)
                    }
                    Err(err) => return Err(DigestError::Analysis(err)),
                }
            }
        };

        transitions.enter(RunState::Publishing);
        let text = render_digest(&digest, lower_bound, fetched_at, self.clock.now());
        let published = match self.publisher.publish(&text).await {
            Ok(()) => true,
            Err(err) => {
                // The range was analyzed; advancing anyway keeps later runs
                // from stalling on a delivery problem.
                error!(?err, "failed to publish digest, checkpoint will still advance");
                false
            }
        };

        let checkpoint = match self.cursor_to_write(mode) {
            Some(cursor) => {
                transitions.enter(RunState::Checkpointing);
                let effective = self.store.advance(cursor, self.clock.now()).await?;
                Some(effective)
            }
            None => None,
        };

        transitions.enter(RunState::Idle);
        info!(
            mode = %mode,
            messages = digest.stats.message_count,
            segments,
            insufficient = digest.insufficient,
            published,
            "digest run finished"
        );

        Ok(RunReport {
            mode: mode.clone(),
            lower_bound,
            bound_from_checkpoint,
            states: transitions.states.clone(),
            digest,
            published,
            checkpoint,
            segments,
        })
    }

    fn cursor_to_write<'a>(&self, mode: &'a RunMode) -> Option<&'a str> {
        if self.settings.checkpointing {
            mode.write_cursor()
        } else {
            None
        }
    }

    async fn stored_bound(&self, mode: &RunMode) -> Result<Option<DateTime<Utc>>, DigestError> {
        if !self.settings.checkpointing {
            return Ok(None);
        }
        let bound = match mode {
            RunMode::Scheduled { cursor } => self.store.get(cursor).await?,
            RunMode::Manual(_) => {
                let scheduled = self.store.get(SCHEDULED_CURSOR).await?;
                let manual = self.store.get(MANUAL_CURSOR).await?;
                scheduled.max(manual)
            }
            RunMode::Window => None,
        };
        Ok(bound)
    }

    /// All human messages strictly newer than `oldest`, ascending and
    /// without duplicates.
    async fn fetch_human_messages(&self, oldest: Ts) -> Result<Vec<Message>, DigestError> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = self
                .fetcher
                .fetch_page(Some(oldest), cursor.as_deref())
                .await
                .map_err(DigestError::Fetch)?;
            pages += 1;
            messages.extend(page.messages);

            match page.next_cursor.filter(|next| !next.is_empty()) {
                Some(next) if seen_cursors.contains(&next) => {
                    return Err(DigestError::Fetch(anyhow::anyhow!(
                        "history pagination repeated cursor `{next}`"
                    )));
                }
                Some(next) => {
                    seen_cursors.push(next.clone());
                    cursor = Some(next);
                }
                None => break,
            }
        }

        let fetched = messages.len();
        messages.retain(|m| !m.is_bot_or_system && m.ts > oldest);
        messages.sort_by_key(|m| m.ts);
        messages.dedup_by_key(|m| m.ts);
        debug!(pages, fetched, kept = messages.len(), "history fetched");
        Ok(messages)
    }
}
