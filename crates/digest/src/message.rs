use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const MICROS_PER_SEC: i64 = 1_000_000;

/// Platform message ordinal: fixed-point `seconds.micros`, stored as whole
/// microseconds since the Unix epoch.
///
/// Constructors reject values outside chrono's representable range, so
/// [`Ts::to_datetime`] never has to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ts(i64);

impl Ts {
    pub fn from_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros).map(|_| Self(micros))
    }

    pub fn from_secs(secs: i64) -> Option<Self> {
        secs.checked_mul(MICROS_PER_SEC).and_then(Self::from_micros)
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros())
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0).unwrap_or_default()
    }

    /// ISO-8601 with millisecond precision and a `Z` suffix.
    pub fn to_iso(self) -> String {
        self.to_datetime().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl FromStr for Ts {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (secs, frac) = raw.split_once('.').unwrap_or((raw, ""));
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            bail!("invalid message timestamp `{raw}`");
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            bail!("invalid message timestamp `{raw}`");
        }

        let secs: i64 = secs.parse()?;
        // Right-pad or truncate the fraction to exactly six digits.
        let mut micros_text: String = frac.chars().take(6).collect();
        while micros_text.len() < 6 {
            micros_text.push('0');
        }
        let micros: i64 = micros_text.parse()?;

        secs.checked_mul(MICROS_PER_SEC)
            .and_then(|s| s.checked_add(micros))
            .and_then(Self::from_micros)
            .ok_or_else(|| anyhow!("message timestamp `{raw}` out of range"))
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(MICROS_PER_SEC);
        let micros = self.0.rem_euclid(MICROS_PER_SEC);
        write!(f, "{secs}.{micros:06}")
    }
}

/// A raw channel message as returned by the history API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub ts: Ts,
    pub user_id: Option<String>,
    pub text: Option<String>,
    pub is_bot_or_system: bool,
}

/// A message with its author's display name resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedMessage {
    pub message: Message,
    pub display_name: String,
    pub iso_timestamp: String,
}

impl EnrichedMessage {
    pub fn new(message: Message, display_name: impl Into<String>) -> Self {
        let iso_timestamp = message.ts.to_iso();
        Self {
            message,
            display_name: display_name.into(),
            iso_timestamp,
        }
    }

    pub fn ts(&self) -> Ts {
        self.message.ts
    }

    pub fn user_id(&self) -> Option<&str> {
        self.message.user_id.as_deref()
    }

    pub fn text(&self) -> &str {
        self.message.text.as_deref().unwrap_or("")
    }
}

/// Evidence counters for a fetched range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeStats {
    pub message_count: usize,
    pub unique_user_count: usize,
    pub first_ts: Option<String>,
    pub last_ts: Option<String>,
}

impl RangeStats {
    /// Count messages and distinct authors.  `first_ts`/`last_ts` are the
    /// earliest and latest ordinals present, independent of slice order.
    pub fn from_messages(messages: &[Message]) -> Self {
        let users: HashSet<&str> = messages
            .iter()
            .filter_map(|m| m.user_id.as_deref())
            .collect();
        let first = messages.iter().map(|m| m.ts).min();
        let last = messages.iter().map(|m| m.ts).max();

        Self {
            message_count: messages.len(),
            unique_user_count: users.len(),
            first_ts: first.map(Ts::to_iso),
            last_ts: last.map(Ts::to_iso),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(ts: &str, user: Option<&str>) -> Message {
        Message {
            ts: ts.parse().unwrap(),
            user_id: user.map(ToString::to_string),
            text: Some("hi".to_string()),
            is_bot_or_system: false,
        }
    }

    #[test]
    fn parses_fixed_point_timestamps() {
        let ts: Ts = "1700000000.123456".parse().unwrap();
        assert_eq!(ts.as_micros(), 1_700_000_000_123_456);

        let short: Ts = "1700000000.5".parse().unwrap();
        assert_eq!(short.as_micros(), 1_700_000_000_500_000);

        let whole: Ts = "1700000000".parse().unwrap();
        assert_eq!(whole.as_micros(), 1_700_000_000_000_000);
    }

    #[test]
    fn truncates_excess_fraction_digits() {
        let ts: Ts = "1.1234569".parse().unwrap();
        assert_eq!(ts.as_micros(), 1_123_456);
    }

    #[test]
    fn rejects_malformed_timestamps() {
        assert!("".parse::<Ts>().is_err());
        assert!("abc".parse::<Ts>().is_err());
        assert!("12.3x".parse::<Ts>().is_err());
        assert!("-5.0".parse::<Ts>().is_err());
        assert!(".5".parse::<Ts>().is_err());
    }

    #[test]
    fn display_keeps_six_fraction_digits() {
        let ts: Ts = "1700000000.000042".parse().unwrap();
        assert_eq!(ts.to_string(), "1700000000.000042");
    }

    #[test]
    fn iso_rendering_is_utc_millis() {
        let ts = Ts::from_secs(0).unwrap();
        assert_eq!(ts.to_iso(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn ordering_follows_numeric_value() {
        let a: Ts = "99.9".parse().unwrap();
        let b: Ts = "100.0".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn stats_count_messages_and_distinct_users() {
        let messages = vec![
            msg("10.0", Some("U1")),
            msg("20.0", Some("U2")),
            msg("30.0", Some("U1")),
            msg("40.0", None),
        ];
        let stats = RangeStats::from_messages(&messages);
        assert_eq!(stats.message_count, 4);
        assert_eq!(stats.unique_user_count, 2);
        assert_eq!(stats.first_ts.as_deref(), Some("1970-01-01T00:00:10.000Z"));
        assert_eq!(stats.last_ts.as_deref(), Some("1970-01-01T00:00:40.000Z"));
    }

    #[test]
    fn stats_for_empty_range() {
        let stats = RangeStats::from_messages(&[]);
        assert_eq!(stats, RangeStats::default());
        assert!(stats.first_ts.is_none());
    }

    #[test]
    fn enriched_message_exposes_iso_timestamp() {
        let enriched = EnrichedMessage::new(msg("60.25", Some("U9")), "Ada");
        assert_eq!(enriched.iso_timestamp, "1970-01-01T00:01:00.250Z");
        assert_eq!(enriched.user_id(), Some("U9"));
        assert_eq!(enriched.text(), "hi");
    }
}
