//! Language-model backed [`Analyzer`].

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use recap_config::LlmConfig;
use recap_digest::{AnalysisError, AnalysisReply, Analyzer, RangeStats, analysis_schema};
use recap_llm::{LlmRouter, Provider, StructuredRequest, extract_json_output};

const SCHEMA_NAME: &str = "channel_digest";

pub const SYSTEM_PROMPT: &str = "\
FUNCTION
Analyze conversation data from an educational Slack channel. Extract patterns in participants' questions and conceptual difficulties.
Keep academic precision and avoid conversational language.

OUTPUT REQUIREMENTS
1. A concise summary (at most 300 words) of the key topics and discussions.
2. Specific patterns in participants' questions, each with supporting evidence.
3. Cognitive barriers and conceptual obstacles evidenced in the conversation.
4. Three to five targeted questions addressing the core conceptual challenges.
5. Technical issues the conversation left unresolved.

RESPONSE PROTOCOL
- Report only what the transcript shows. Do not speculate.
- Cite concrete examples from the conversation where possible.
- If the transcript is too thin to support these findings, set `insufficient` to true, explain why in `insufficient_reason` and leave the other fields empty.
- Otherwise set `insufficient` to false and `insufficient_reason` to an empty string.

Respond with a single JSON object matching the provided schema.";

/// Sends the segmented transcript to the configured provider and validates
/// the structured reply.
pub struct LlmAnalyzer {
    router: LlmRouter,
    provider: Provider,
    ollama_model: String,
    openrouter_model: String,
}

impl LlmAnalyzer {
    pub fn new(router: LlmRouter, config: &LlmConfig) -> Self {
        Self {
            router,
            provider: Provider::from_config(&config.provider),
            ollama_model: config.ollama_model.clone(),
            openrouter_model: config.openrouter_model.clone(),
        }
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        formatted_segments: &str,
        stats: &RangeStats,
        meets_threshold: bool,
    ) -> Result<AnalysisReply, AnalysisError> {
        let user = build_user_message(formatted_segments, stats, meets_threshold);
        let request = StructuredRequest {
            schema_name: SCHEMA_NAME,
            schema: analysis_schema(),
            system: SYSTEM_PROMPT,
            user: &user,
        };

        info!(
            provider = ?self.provider,
            messages = stats.message_count,
            "requesting channel analysis"
        );
        let raw = self
            .router
            .complete_structured(
                self.provider,
                &self.ollama_model,
                &self.openrouter_model,
                &request,
            )
            .await
            .map_err(AnalysisError::Transient)?;
        debug!(chars = raw.len(), "analysis reply received");

        parse_analysis_reply(&raw)
    }
}

/// Validate raw model output.  Anything that is not a schema-conforming
/// object is [`AnalysisError::Malformed`].
pub fn parse_analysis_reply(raw: &str) -> Result<AnalysisReply, AnalysisError> {
    let value = serde_json::from_str::<Value>(raw.trim())
        .ok()
        .or_else(|| extract_json_output::<Value>(raw))
        .ok_or_else(|| AnalysisError::Malformed("reply contained no JSON object".to_string()))?;
    AnalysisReply::validate(value)
}

fn build_user_message(formatted_segments: &str, stats: &RangeStats, meets_threshold: bool) -> String {
    let range = match (&stats.first_ts, &stats.last_ts) {
        (Some(first), Some(last)) => format!("{first} to {last}"),
        _ => "an empty range".to_string(),
    };
    let mut message = format!(
        "Conversation history covering {range}: {} messages from {} participants, grouped into segments.\n",
        stats.message_count, stats.unique_user_count
    );
    if !meets_threshold {
        message.push_str("This range is below the minimum activity threshold.\n");
    }
    message.push('\n');
    message.push_str(formatted_segments);
    message
}
