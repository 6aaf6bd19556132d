use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use recap_config::redact;

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenRouter,
}

impl Provider {
    /// Map a config string onto a provider; anything but `openrouter`
    /// (case-insensitive) selects Ollama.
    pub fn from_config(name: &str) -> Self {
        if name.eq_ignore_ascii_case("openrouter") {
            Provider::OpenRouter
        } else {
            Provider::Ollama
        }
    }
}

/// A single schema-constrained completion.
///
/// `schema` is a JSON Schema document; providers that support structured
/// output are asked to conform to it.  The reply is still returned as raw
/// text so the caller decides how to validate it.
#[derive(Debug, Clone)]
pub struct StructuredRequest<'a> {
    pub schema_name: &'a str,
    pub schema: serde_json::Value,
    pub system: &'a str,
    pub user: &'a str,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
}

fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build LLM HTTP client")
}

/// Error for a non-2xx provider reply.  The body is redacted because
/// providers echo request headers and keys back in some error payloads.
fn provider_error(provider: &str, status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    anyhow!("{provider} error ({status}): {}", redact(body))
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

impl OpenRouterClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LlmRouter {
    ollama: OllamaClient,
    openrouter: OpenRouterClient,
}

impl LlmRouter {
    pub fn new(ollama_base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            ollama: OllamaClient::new(ollama_base_url, timeout)?,
            openrouter: OpenRouterClient::new(timeout)?,
        })
    }

    /// Run a structured completion against the selected provider.
    ///
    /// Transport failures and non-2xx responses are returned as errors; an
    /// empty or missing content field is also an error.  Parsing the reply
    /// is left to the caller.
    pub async fn complete_structured(
        &self,
        provider: Provider,
        ollama_model: &str,
        openrouter_model: &str,
        request: &StructuredRequest<'_>,
    ) -> Result<String> {
        match provider {
            Provider::Ollama => self.ollama.chat_structured(ollama_model, request).await,
            Provider::OpenRouter => {
                self.openrouter
                    .chat_structured(openrouter_model, request)
                    .await
            }
        }
    }
}

impl OllamaClient {
    async fn chat_structured(&self, model: &str, request: &StructuredRequest<'_>) -> Result<String> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));

        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user}
            ],
            "format": request.schema,
            "stream": false
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Ollama unavailable at {}", self.base_url))?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(provider_error("Ollama", status, &raw));
        }
        let body: serde_json::Value =
            serde_json::from_str(&raw).context("Ollama returned invalid JSON")?;
        debug!(model, "ollama structured reply received");

        body.get("message")
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .filter(|content| !content.trim().is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("Ollama response missing content"))
    }
}

impl OpenRouterClient {
    async fn chat_structured(&self, model: &str, request: &StructuredRequest<'_>) -> Result<String> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("OPENROUTER_API_KEY is not set"))?;

        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user}
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema
                }
            }
        });

        let response = self
            .client
            .post(OPENROUTER_CHAT_URL)
            .bearer_auth(api_key)
            .header("X-Title", "Recap")
            .json(&payload)
            .send()
            .await
            .context("OpenRouter request failed")?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(provider_error("OpenRouter", status, &raw));
        }
        let body: serde_json::Value =
            serde_json::from_str(&raw).context("OpenRouter returned invalid JSON")?;
        debug!(model, "openrouter structured reply received");

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .filter(|content| !content.trim().is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("OpenRouter response missing content"))
    }
}

// ── Structured output extraction ──────────────────────────────────────────────

/// Extract the first valid JSON value from an LLM response.
///
/// Tries a fenced ` ```json ` block first, then the span from the first `{`
/// to the last `}`.  Returns `None` when neither parses into `T`.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    // Strategy 1: fenced ```json ... ``` blocks.
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(json_start) = after_fence.find(|c: char| !c.is_whitespace()) {
            let json_body = &after_fence[json_start..];
            if let Some(fence_end) = json_body.find("```") {
                let json_str = json_body[..fence_end].trim();
                if let Ok(val) = serde_json::from_str(json_str) {
                    return Some(val);
                }
            }
        }
    }

    // Strategy 2: bare JSON object.
    let trimmed = response.trim();
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                let candidate = &trimmed[start..=end];
                if let Ok(val) = serde_json::from_str(candidate) {
                    return Some(val);
                }
            }
        }
    }

    None
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Reply {
        summary: String,
        #[serde(default)]
        questions: Vec<String>,
    }

    #[test]
    fn provider_from_config_is_case_insensitive() {
        assert_eq!(Provider::from_config("OpenRouter"), Provider::OpenRouter);
        assert_eq!(Provider::from_config("ollama"), Provider::Ollama);
        assert_eq!(Provider::from_config("anything"), Provider::Ollama);
    }

    #[test]
    fn extract_fenced_json() {
        let raw = "Sure!\n```json\n{\"summary\":\"ok\",\"questions\":[\"why?\"]}\n```";
        let out = extract_json_output::<Reply>(raw).unwrap();
        assert_eq!(out.summary, "ok");
        assert_eq!(out.questions, vec!["why?"]);
    }

    #[test]
    fn extract_bare_json_with_surrounding_text() {
        let raw = "preamble {\"summary\":\"x\"} epilogue";
        let out = extract_json_output::<Reply>(raw).unwrap();
        assert_eq!(out.summary, "x");
        assert!(out.questions.is_empty());
    }

    #[test]
    fn extract_fenced_takes_precedence_over_bare() {
        let raw = "Bare: {\"summary\":\"wrong\"}\n```json\n{\"summary\":\"right\"}\n```\n";
        let out = extract_json_output::<Reply>(raw).unwrap();
        assert_eq!(out.summary, "right");
    }

    #[test]
    fn extract_returns_none_for_plain_text() {
        assert!(extract_json_output::<Reply>("no json here").is_none());
        assert!(extract_json_output::<Reply>("").is_none());
    }

    #[test]
    fn extract_returns_none_when_shape_mismatches() {
        // Valid JSON, but `summary` is missing.
        assert!(extract_json_output::<Reply>("{\"questions\":[]}").is_none());
    }

    #[test]
    fn extract_two_bare_objects_returns_none() {
        let raw = r#"Here: {"summary":"a"} and also {"summary":"b"}"#;
        assert!(extract_json_output::<Reply>(raw).is_none());
    }

    #[tokio::test]
    async fn openrouter_without_key_is_an_error() {
        // SAFETY: test is single-threaded for this env var.
        unsafe { std::env::remove_var("OPENROUTER_API_KEY") };
        let router = LlmRouter::new("http://localhost:11434", None).unwrap();
        let request = StructuredRequest {
            schema_name: "digest",
            schema: json!({"type": "object"}),
            system: "sys",
            user: "user",
        };
        let err = router
            .complete_structured(Provider::OpenRouter, "m", "m", &request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn provider_error_body_is_redacted() {
        let body = r#"{"error": {"message": "invalid key sk-or-v1-abcdef0123456789abcd"}}"#;
        let err = provider_error("OpenRouter", reqwest::StatusCode::UNAUTHORIZED, body);
        let text = err.to_string();
        assert!(text.starts_with("OpenRouter error (401 Unauthorized)"));
        assert!(!text.contains("sk-or-v1"));
        assert!(text.contains("[REDACTED]"));
    }

    #[test]
    fn router_builds_with_timeout() {
        assert!(LlmRouter::new("http://localhost:11434", Some(Duration::from_secs(5))).is_ok());
    }
}
