use chrono::{DateTime, SecondsFormat, Utc};

use crate::schema::Digest;

/// Render a digest as Slack mrkdwn.
///
/// `covered_from` is the exclusive lower bound of the run and `covered_to`
/// the time the history was fetched.
pub fn render_digest(
    digest: &Digest,
    covered_from: DateTime<Utc>,
    covered_to: DateTime<Utc>,
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = format!(
        "*Channel Activity Analysis ({} → {})*\n\n",
        short_time(covered_from),
        short_time(covered_to)
    );

    if digest.insufficient {
        out.push_str("*Not enough evidence for a digest.*\n");
        if !digest.insufficient_reason.is_empty() {
            out.push_str(&format!("Reason: {}\n", digest.insufficient_reason));
        }
        out.push_str(&format!(
            "Activity: {} messages from {} participants\n",
            digest.stats.message_count, digest.stats.unique_user_count
        ));
    } else {
        out.push_str(&format!("*Summary:*\n{}\n\n", digest.summary));

        if !digest.concept_trends.is_empty() {
            out.push_str("*🔍 Question Patterns:*\n");
            for trend in &digest.concept_trends {
                out.push_str(&format!("• {trend}\n"));
            }
            out.push('\n');
        }

        if !digest.metacognitive_insights.is_empty() {
            out.push_str(&format!(
                "*🧠 Learning Analysis:*\n{}\n\n",
                digest.metacognitive_insights
            ));
        }

        if !digest.questions.is_empty() {
            out.push_str("*💡 Discussion Questions:*\n");
            for (index, question) in digest.questions.iter().enumerate() {
                out.push_str(&format!("{}. {question}\n", index + 1));
            }
            out.push('\n');
        }

        if !digest.unresolved_issues.is_empty() {
            out.push_str("*⚠️ Unresolved Issues:*\n");
            for issue in &digest.unresolved_issues {
                out.push_str(&format!("• {issue}\n"));
            }
        }
    }

    out.push_str(&format!(
        "\n_Generated {}_",
        generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out
}

fn short_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RangeStats;
    use chrono::TimeZone;

    fn times() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
        )
    }

    #[test]
    fn renders_all_sections() {
        let digest = Digest {
            insufficient: false,
            insufficient_reason: String::new(),
            summary: "Lots of orbit talk.".to_string(),
            concept_trends: vec!["Escape velocity".to_string()],
            metacognitive_insights: "Unit confusion.".to_string(),
            questions: vec!["What is v_esc?".to_string(), "Why?".to_string()],
            unresolved_issues: vec!["Homework 3 key".to_string()],
            stats: RangeStats::default(),
        };
        let (from, to) = times();
        let text = render_digest(&digest, from, to, to);

        assert!(text.starts_with("*Channel Activity Analysis (2024-01-08 09:00 UTC → 2024-01-15 09:00 UTC)*"));
        assert!(text.contains("*Summary:*\nLots of orbit talk."));
        assert!(text.contains("• Escape velocity"));
        assert!(text.contains("Unit confusion."));
        assert!(text.contains("2. Why?"));
        assert!(text.contains("• Homework 3 key"));
        assert!(text.ends_with("_Generated 2024-01-15T09:00:00Z_"));
    }

    #[test]
    fn renders_insufficient_digest_with_reason_and_counts() {
        let stats = RangeStats {
            message_count: 2,
            unique_user_count: 1,
            first_ts: None,
            last_ts: None,
        };
        let digest = Digest::insufficient("no activity", stats);
        let (from, to) = times();
        let text = render_digest(&digest, from, to, to);

        assert!(text.contains("Not enough evidence"));
        assert!(text.contains("Reason: no activity"));
        assert!(text.contains("2 messages from 1 participants"));
        assert!(!text.contains("*Summary:*"));
    }
}
