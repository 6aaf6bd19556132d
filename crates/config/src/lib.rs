use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

mod redact;

pub use redact::redact;

// ── Slack ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Channel whose history is digested and where digests are posted.
    /// Overridden by `SLACK_CHANNEL_ID` when set.
    pub channel_id: String,
    /// Bot token (`xoxb-…`).  Prefer the `SLACK_BOT_TOKEN` environment
    /// variable; the env value takes precedence over the file.
    pub bot_token: String,
    pub api_base_url: String,
    /// Page size requested from `conversations.history`.
    pub page_limit: u32,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            bot_token: String::new(),
            api_base_url: "https://slack.com/api".to_string(),
            page_limit: 100,
        }
    }
}

// ── LLM ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub ollama_model: String,
    pub openrouter_model: String,
    /// Base URL for the Ollama API.  Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    /// Per-request timeout applied by the HTTP client.  `0` leaves the
    /// request unbounded.  Local models can be slow to answer a full day of
    /// history.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            openrouter_model: "openai/gpt-4o".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            request_timeout_secs: 120,
        }
    }
}

// ── Digest ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Window fetched when a cursor has never been set, and the fixed window
    /// used by the periodic (uncheckpointed) digest.
    pub lookback_hours: u64,
    /// Silence longer than this starts a new conversation segment.
    pub gap_minutes: u64,
    /// Minimum number of human messages before the range is analysed.
    pub min_messages: usize,
    /// Minimum number of distinct authors before the range is analysed.
    pub min_unique_users: usize,
    /// IANA timezone name (e.g. `"America/New_York"`).  Calendar-day
    /// boundaries for segmentation and cron schedules are evaluated here.
    /// Falls back to UTC when the name is unrecognised.
    pub timezone: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            gap_minutes: 90,
            min_messages: 5,
            min_unique_users: 2,
            timezone: "UTC".to_string(),
        }
    }
}

// ── Schedules ─────────────────────────────────────────────────────────────────

/// Cron expressions for the two background digests.  Six-field expressions
/// (with seconds) are used as-is; five-field crontab expressions get a `0`
/// seconds field prepended.  An empty string disables that schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Fixed-window digest over the last `lookback_hours`.  Reads and writes
    /// no checkpoint.
    pub periodic: String,
    /// Calendar-anchored digest that resumes from the `scheduled` cursor.
    pub weekly: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            periodic: "0 0 18 * * Mon-Fri".to_string(),
            weekly: "0 0 9 * * Mon".to_string(),
        }
    }
}

// ── Checkpoints ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// JSON document holding one ISO-8601 timestamp per cursor.
    /// Overridden by `RECAP_CHECKPOINT_PATH` when set.
    pub path: String,
    /// When `false` every run falls back to the fixed lookback window and no
    /// cursor is ever written.
    pub enabled: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: ".recap/checkpoints.json".to_string(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub digest: DigestConfig,
    pub schedule: ScheduleConfig,
    pub checkpoint: CheckpointConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(token) = non_empty_env("SLACK_BOT_TOKEN") {
            self.slack.bot_token = token;
        }
        if let Some(channel) = non_empty_env("SLACK_CHANNEL_ID") {
            self.slack.channel_id = channel;
        }
        if let Some(url) = non_empty_env("OLLAMA_BASE_URL") {
            self.llm.ollama_base_url = url;
        }
        if let Some(path) = non_empty_env("RECAP_CHECKPOINT_PATH") {
            self.checkpoint.path = path;
        }
    }

    pub fn active_model(&self) -> &str {
        if self.llm.provider.eq_ignore_ascii_case("openrouter") {
            &self.llm.openrouter_model
        } else {
            &self.llm.ollama_model
        }
    }

    /// Startup check for settings without which no digest can run.
    pub fn validate(&self) -> Result<()> {
        if self.slack.channel_id.trim().is_empty() {
            bail!("slack.channel_id is not set (config file or SLACK_CHANNEL_ID)");
        }
        if self.slack.bot_token.trim().is_empty() {
            bail!("slack.bot_token is not set (config file or SLACK_BOT_TOKEN)");
        }
        if self.digest.gap_minutes == 0 {
            bail!("digest.gap_minutes must be greater than zero");
        }
        let provider = self.llm.provider.to_ascii_lowercase();
        if provider != "ollama" && provider != "openrouter" {
            bail!("llm.provider must be `ollama` or `openrouter`, got `{}`", self.llm.provider);
        }
        if self.checkpoint.enabled && self.checkpoint.path.trim().is_empty() {
            bail!("checkpoint.path is empty while checkpointing is enabled");
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

// ── Tests ────────────────────────────────────────────────────────────────────
