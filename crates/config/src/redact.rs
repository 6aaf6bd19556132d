//! Masking of credentials before text reaches the logs.

use std::sync::LazyLock;

use regex::Regex;

const REDACTED: &str = "[REDACTED]";

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Slack tokens: xoxb-, xoxp-, xoxa-, xoxr-, xoxs-, xapp-
        r"xox[abprs]-[A-Za-z0-9-]{10,}",
        r"xapp-[A-Za-z0-9-]{10,}",
        // OpenRouter / OpenAI style keys
        r"sk-[A-Za-z0-9_-]{16,}",
        r"Bearer\s+[A-Za-z0-9._-]{10,}",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Replace every known secret pattern in `input` with `[REDACTED]`.
pub fn redact(input: &str) -> String {
    SECRET_PATTERNS
        .iter()
        .fold(input.to_string(), |text, pattern| {
            pattern.replace_all(&text, REDACTED).into_owned()
        })
}
