//! Recognition of on-demand summary requests in incoming Slack traffic.

/// Slash command that requests a manual digest.
pub const SUMMARY_COMMAND: &str = "/generate-summary";

/// Reaction that requests a digest when placed on a message asking for one.
pub const SUMMARY_REACTION: &str = "pencil";

const REQUEST_PHRASES: [&str; 4] = [
    "summary please",
    "summarize channel",
    "channel summary",
    "generate summary",
];

const REACTION_KEYWORDS: [&str; 4] = ["summary", "summarize", "analyze", "overview"];

/// `true` when a channel message asks for a summary.
pub fn is_summary_request(text: &str) -> bool {
    let text = text.to_lowercase();
    REQUEST_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// `true` for the summary slash command, with or without arguments.
pub fn is_summary_command(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|name| name.eq_ignore_ascii_case(SUMMARY_COMMAND))
}

/// `true` when `reaction` is the summary reaction and the message it was
/// added to mentions a summary.
pub fn is_summary_reaction(reaction: &str, message_text: &str) -> bool {
    if reaction != SUMMARY_REACTION {
        return false;
    }
    let text = message_text.to_lowercase();
    REACTION_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_request_phrases_case_insensitively() {
        assert!(is_summary_request("Summary please!"));
        assert!(is_summary_request("could someone GENERATE SUMMARY of today"));
        assert!(!is_summary_request("please summarize the homework"));
        assert!(!is_summary_request(""));
    }

    #[test]
    fn matches_slash_command() {
        assert!(is_summary_command("/generate-summary"));
        assert!(is_summary_command("/Generate-Summary last week"));
        assert!(!is_summary_command("/generate"));
    }

    #[test]
    fn pencil_reaction_needs_keyword() {
        assert!(is_summary_reaction("pencil", "Can we get an overview?"));
        assert!(!is_summary_reaction("pencil", "nice work"));
        assert!(!is_summary_reaction("thumbsup", "summary please"));
    }
}
