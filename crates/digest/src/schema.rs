//! Digest shape and validation of analyzer replies.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::message::RangeStats;

/// Reason used when the range had no human messages at all.
pub const NO_ACTIVITY_REASON: &str = "no activity";
/// Reason used when the analyzer reply could not be validated.
pub const ANALYSIS_ERROR_REASON: &str = "analysis error";

/// The published result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub insufficient: bool,
    pub insufficient_reason: String,
    pub summary: String,
    pub concept_trends: Vec<String>,
    pub metacognitive_insights: String,
    pub questions: Vec<String>,
    pub unresolved_issues: Vec<String>,
    pub stats: RangeStats,
}

impl Digest {
    pub fn insufficient(reason: impl Into<String>, stats: RangeStats) -> Self {
        Self {
            insufficient: true,
            insufficient_reason: reason.into(),
            summary: String::new(),
            concept_trends: Vec::new(),
            metacognitive_insights: String::new(),
            questions: Vec::new(),
            unresolved_issues: Vec::new(),
            stats,
        }
    }

    /// Adopt an analyzer reply.  The reply can only clear `insufficient`
    /// when the activity gate passed on the raw range.
    pub fn from_analysis(reply: AnalysisReply, stats: RangeStats, gate_passed: bool) -> Self {
        let insufficient = reply.insufficient || !gate_passed;
        let insufficient_reason = if !gate_passed && reply.insufficient_reason.trim().is_empty() {
            "below activity threshold".to_string()
        } else if insufficient {
            reply.insufficient_reason
        } else {
            String::new()
        };

        Self {
            insufficient,
            insufficient_reason,
            summary: reply.summary,
            concept_trends: reply.concept_trends,
            metacognitive_insights: reply.metacognitive_insights,
            questions: reply.questions,
            unresolved_issues: reply.unresolved_issues,
            stats,
        }
    }
}

/// Exact JSON object the analyzer must return.  Every field is required and
/// unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AnalysisReply {
    /// True when the conversation does not support a meaningful digest.
    pub insufficient: bool,
    /// Why the digest is insufficient; empty otherwise.
    pub insufficient_reason: String,
    /// Technical summary of key topics and discussions.
    pub summary: String,
    /// Patterns in participants' questions, each with supporting evidence.
    pub concept_trends: Vec<String>,
    /// Cognitive barriers and conceptual obstacles observed.
    pub metacognitive_insights: String,
    /// Targeted follow-up questions.
    pub questions: Vec<String>,
    /// Technical issues left unresolved in the conversation.
    pub unresolved_issues: Vec<String>,
}

impl AnalysisReply {
    /// Validate an untrusted JSON value against the reply schema.
    pub fn validate(value: serde_json::Value) -> Result<Self, AnalysisError> {
        if !value.is_object() {
            return Err(AnalysisError::Malformed(
                "analysis reply is not a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|err| AnalysisError::Malformed(err.to_string()))
    }
}

/// JSON Schema sent with structured-output requests.
pub fn analysis_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(AnalysisReply);
    serde_json::to_value(schema.schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}
