//! Conversation segmentation.
//!
//! A chronological message list is cut into bursts: a new segment starts
//! wherever the silence since the previous message exceeds the configured
//! gap, or where the local calendar date changes.

use chrono::TimeDelta;
use chrono_tz::Tz;

use crate::message::EnrichedMessage;

/// A non-empty, time-contiguous run of messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    messages: Vec<EnrichedMessage>,
}

impl Segment {
    fn starting_with(first: EnrichedMessage) -> Self {
        Self {
            messages: vec![first],
        }
    }

    pub fn messages(&self) -> &[EnrichedMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first(&self) -> &EnrichedMessage {
        &self.messages[0]
    }

    pub fn last(&self) -> &EnrichedMessage {
        &self.messages[self.messages.len() - 1]
    }

    pub fn into_messages(self) -> Vec<EnrichedMessage> {
        self.messages
    }
}

/// Partition `messages` into segments.
///
/// Input is expected in ascending `ts` order; the function does not re-sort.
/// Out-of-order input still yields a valid partition (a negative gap never
/// splits), and empty input yields no segments.
pub fn segment_messages(messages: Vec<EnrichedMessage>, gap: TimeDelta, tz: Tz) -> Vec<Segment> {
    let gap_micros = gap.num_microseconds().unwrap_or(i64::MAX);
    let mut segments: Vec<Segment> = Vec::new();

    for message in messages {
        match segments.last_mut() {
            Some(current) if !is_boundary(current.last(), &message, gap_micros, tz) => {
                current.messages.push(message);
            }
            _ => segments.push(Segment::starting_with(message)),
        }
    }

    segments
}

fn is_boundary(prev: &EnrichedMessage, next: &EnrichedMessage, gap_micros: i64, tz: Tz) -> bool {
    let elapsed = next.ts().as_micros().saturating_sub(prev.ts().as_micros());
    if elapsed > gap_micros {
        return true;
    }
    let prev_day = prev.ts().to_datetime().with_timezone(&tz).date_naive();
    let next_day = next.ts().to_datetime().with_timezone(&tz).date_naive();
    prev_day != next_day
}

/// Render segments as the transcript handed to the analyzer.
pub fn format_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let header = format!(
                "--- Segment {} ({} → {}, {} messages) ---",
                index + 1,
                segment.first().iso_timestamp,
                segment.last().iso_timestamp,
                segment.len()
            );
            let lines = segment
                .messages()
                .iter()
                .map(|m| format!("[{}] {}: {}", m.iso_timestamp, m.display_name, m.text()))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{header}\n{lines}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Ts};
    use chrono::{TimeZone, Utc};

    fn at_secs(secs: i64) -> EnrichedMessage {
        let message = Message {
            ts: Ts::from_secs(secs).unwrap(),
            user_id: Some("U1".to_string()),
            text: Some(format!("t={secs}")),
            is_bot_or_system: false,
        };
        EnrichedMessage::new(message, "Ada")
    }

    fn ts_list(segments: &[Segment]) -> Vec<Vec<i64>> {
        segments
            .iter()
            .map(|s| s.messages().iter().map(|m| m.ts().as_micros() / 1_000_000).collect())
            .collect()
    }

    #[test]
    fn empty_input_yields_no_segments() {
        assert!(segment_messages(Vec::new(), TimeDelta::minutes(90), Tz::UTC).is_empty());
    }

    #[test]
    fn single_message_is_one_segment() {
        let segments = segment_messages(vec![at_secs(0)], TimeDelta::minutes(90), Tz::UTC);
        assert_eq!(ts_list(&segments), vec![vec![0]]);
    }

    #[test]
    fn gap_exactly_at_threshold_does_not_split() {
        let messages = vec![at_secs(0), at_secs(5400)];
        let segments = segment_messages(messages, TimeDelta::minutes(90), Tz::UTC);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn gap_beyond_threshold_splits() {
        let messages = vec![at_secs(0), at_secs(100), at_secs(100 + 5401)];
        let segments = segment_messages(messages, TimeDelta::minutes(90), Tz::UTC);
        assert_eq!(ts_list(&segments), vec![vec![0, 100], vec![5501]]);
    }

    #[test]
    fn day_boundary_splits_even_with_huge_gap() {
        // 23:58:20 and 23:59:59 on Jan 1, then 00:00:01 on Jan 2.
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 23, 58, 20).unwrap().timestamp();
        let messages = vec![at_secs(base), at_secs(base + 99), at_secs(base + 101)];
        let segments = segment_messages(messages, TimeDelta::days(30), Tz::UTC);
        assert_eq!(
            ts_list(&segments),
            vec![vec![base, base + 99], vec![base + 101]]
        );
    }

    #[test]
    fn day_boundary_uses_configured_timezone() {
        // 23:30 and 00:30 UTC straddle a UTC midnight but sit on the same
        // local day in New York (18:30 and 19:30 EST).
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap().timestamp();
        let messages = vec![at_secs(first), at_secs(first + 3600)];

        let utc = segment_messages(messages.clone(), TimeDelta::minutes(90), Tz::UTC);
        assert_eq!(utc.len(), 2);

        let ny = segment_messages(messages, TimeDelta::minutes(90), chrono_tz::America::New_York);
        assert_eq!(ny.len(), 1);
    }

    #[test]
    fn segments_partition_the_input_exactly() {
        let secs = [0, 10, 20, 9_000, 9_050, 20_000, 86_400, 86_410, 200_000];
        let messages: Vec<_> = secs.iter().map(|s| at_secs(*s)).collect();
        let segments = segment_messages(messages.clone(), TimeDelta::minutes(60), Tz::UTC);

        assert!(segments.iter().all(|s| !s.is_empty()));
        let total: usize = segments.iter().map(Segment::len).sum();
        assert_eq!(total, messages.len());
        let rejoined: Vec<_> = segments.into_iter().flat_map(Segment::into_messages).collect();
        assert_eq!(rejoined, messages);
    }

    #[test]
    fn unsorted_input_does_not_panic_and_still_partitions() {
        let messages = vec![at_secs(500), at_secs(100), at_secs(200)];
        let segments = segment_messages(messages, TimeDelta::minutes(90), Tz::UTC);
        let total: usize = segments.iter().map(Segment::len).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn formatted_transcript_has_headers_and_lines() {
        let segments = segment_messages(
            vec![at_secs(0), at_secs(60), at_secs(10_000)],
            TimeDelta::minutes(90),
            Tz::UTC,
        );
        let text = format_segments(&segments);
        assert!(text.starts_with("--- Segment 1 (1970-01-01T00:00:00.000Z → 1970-01-01T00:01:00.000Z, 2 messages) ---"));
        assert!(text.contains("[1970-01-01T00:01:00.000Z] Ada: t=60"));
        assert!(text.contains("--- Segment 2"));
    }
}
