//! Slack Web API adapter for the digest engine.
//!
//! [`SlackClient`] fills the fetch, directory and publish roles of an
//! orchestrator.  The trigger predicates ([`is_summary_request`],
//! [`is_summary_command`], [`is_summary_reaction`]) are the public entry
//! checks for an event dispatch layer (Events API or Socket Mode receiver)
//! that turns a matching message, slash command or reaction into
//! `Orchestrator::run_manual` with the originating thread in its
//! `TriggerContext`.  This crate does not receive events itself.

mod triggers;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use recap_config::{SlackConfig, redact};
use recap_digest::{HistoryFetcher, HistoryPage, Message, Publisher, TriggerContext, Ts, UserDirectory};

pub use triggers::{
    SUMMARY_COMMAND, SUMMARY_REACTION, is_summary_command, is_summary_reaction, is_summary_request,
};

/// Slack rejects very long messages; stay well below the limit.
const MAX_MESSAGE_CHARS: usize = 3900;

/// Bot-token client bound to one channel.
pub struct SlackClient {
    http: Client,
    base_url: String,
    token: String,
    channel_id: String,
    page_limit: u32,
    names: Mutex<HashMap<String, String>>,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Slack HTTP client")?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
            channel_id: config.channel_id.clone(),
            page_limit: config.page_limit.clamp(1, 1000),
            names: Mutex::new(HashMap::new()),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn get<T: DeserializeOwned + Default>(&self, method: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("slack {method} request failed"))?;
        parse_response(method, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned + Default>(&self, method: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("slack {method} request failed"))?;
        parse_response(method, response).await
    }

    async fn post_text(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> Result<()> {
        for chunk in chunk_message(text, MAX_MESSAGE_CHARS) {
            let body = PostMessageRequest {
                channel,
                text: &chunk,
                thread_ts,
                mrkdwn: true,
            };
            let _: serde_json::Value = self.post("chat.postMessage", &body).await?;
        }
        Ok(())
    }
}

async fn parse_response<T: DeserializeOwned + Default>(method: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("slack {method} response unreadable"))?;
    if !status.is_success() {
        bail!("slack {method} returned {status}: {}", redact(&body));
    }

    let payload: SlackResponse<T> = serde_json::from_str(&body)
        .with_context(|| format!("slack {method} returned invalid JSON"))?;
    if !payload.ok {
        let error = payload.error.unwrap_or_else(|| "unknown_error".to_string());
        bail!("slack {method} failed: {error}");
    }
    Ok(payload.data)
}

#[async_trait]
impl HistoryFetcher for SlackClient {
    async fn fetch_page(&self, oldest: Option<Ts>, cursor: Option<&str>) -> Result<HistoryPage> {
        let mut query = vec![
            ("channel", self.channel_id.clone()),
            ("limit", self.page_limit.to_string()),
            ("inclusive", "false".to_string()),
        ];
        if let Some(oldest) = oldest {
            query.push(("oldest", oldest.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let history: HistoryResponse = self.get("conversations.history", &query).await?;
        let next_cursor = history
            .response_metadata
            .map(|meta| meta.next_cursor)
            .filter(|next| !next.is_empty());
        let messages: Vec<Message> = history
            .messages
            .into_iter()
            .filter_map(RawMessage::into_message)
            .collect();
        debug!(count = messages.len(), has_more = next_cursor.is_some(), "fetched history page");

        Ok(HistoryPage {
            messages,
            next_cursor,
        })
    }
}

#[async_trait]
impl UserDirectory for SlackClient {
    async fn display_name(&self, user_id: &str) -> Result<String> {
        if let Some(name) = self.names.lock().await.get(user_id) {
            return Ok(name.clone());
        }

        let info: UserInfoResponse = self
            .get("users.info", &[("user", user_id.to_string())])
            .await?;
        let name = info
            .user
            .map(|user| user.preferred_name())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| user_id.to_string());

        self.names
            .lock()
            .await
            .insert(user_id.to_string(), name.clone());
        Ok(name)
    }
}

#[async_trait]
impl Publisher for SlackClient {
    async fn publish(&self, text: &str) -> Result<()> {
        self.post_text(&self.channel_id, None, text).await
    }

    async fn acknowledge(&self, context: &TriggerContext, text: &str) -> Result<()> {
        let channel = if context.channel.is_empty() {
            self.channel_id.as_str()
        } else {
            context.channel.as_str()
        };
        self.post_text(channel, context.thread_ts.as_deref(), text).await
    }
}

/// Split `text` on line boundaries into chunks of at most `max_chars`.
/// A single line longer than the limit is split at character boundaries.
fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count() + 1;
        if current_len > 0 && current_len + line_len > max_chars {
            chunks.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current.push('\n');
        current_len += line_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim_end().to_string());
    }
    chunks
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SlackResponse<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryResponse {
    messages: Vec<RawMessage>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseMetadata {
    next_cursor: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMessage {
    ts: String,
    user: Option<String>,
    text: Option<String>,
    subtype: Option<String>,
    bot_id: Option<String>,
}

impl RawMessage {
    fn into_message(self) -> Option<Message> {
        let ts = match self.ts.parse::<Ts>() {
            Ok(ts) => ts,
            Err(err) => {
                warn!(ts = %self.ts, ?err, "skipping message with unparseable ts");
                return None;
            }
        };
        Some(Message {
            ts,
            is_bot_or_system: self.bot_id.is_some() || self.subtype.is_some(),
            user_id: self.user,
            text: self.text,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserInfoResponse {
    user: Option<SlackUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SlackUser {
    name: String,
    real_name: Option<String>,
}

impl SlackUser {
    fn preferred_name(self) -> String {
        self.real_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(self.name)
    }
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
    mrkdwn: bool,
}
