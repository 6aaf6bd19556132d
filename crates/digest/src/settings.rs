use chrono::TimeDelta;
use chrono_tz::Tz;
use tracing::warn;

use recap_config::AppConfig;

/// Resolved run parameters for the digest engine.
#[derive(Debug, Clone)]
pub struct DigestSettings {
    /// Window used when a cursor is unset, and by fixed-window runs.
    pub lookback: TimeDelta,
    /// Silence longer than this splits a segment.
    pub gap: TimeDelta,
    pub min_messages: usize,
    pub min_unique_users: usize,
    /// Zone in which calendar days are evaluated.
    pub timezone: Tz,
    /// When `false`, every run uses the lookback window and no cursor is
    /// written.
    pub checkpointing: bool,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            lookback: TimeDelta::hours(24),
            gap: TimeDelta::minutes(90),
            min_messages: 5,
            min_unique_users: 2,
            timezone: Tz::UTC,
            checkpointing: true,
        }
    }
}

impl DigestSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let digest = &config.digest;
        Self {
            lookback: i64::try_from(digest.lookback_hours)
                .ok()
                .and_then(TimeDelta::try_hours)
                .unwrap_or(TimeDelta::MAX),
            gap: i64::try_from(digest.gap_minutes)
                .ok()
                .and_then(TimeDelta::try_minutes)
                .unwrap_or(TimeDelta::MAX),
            min_messages: digest.min_messages,
            min_unique_users: digest.min_unique_users,
            timezone: parse_timezone(&digest.timezone),
            checkpointing: config.checkpoint.enabled,
        }
    }
}

/// Parse an IANA timezone name, falling back to UTC when unrecognised.
pub fn parse_timezone(name: &str) -> Tz {
    name.trim().parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = name, "unrecognised timezone, using UTC");
        Tz::UTC
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_converts_units() {
        let mut config = AppConfig::default();
        config.digest.lookback_hours = 168;
        config.digest.gap_minutes = 45;
        config.digest.timezone = "America/Chicago".to_string();
        config.checkpoint.enabled = false;

        let settings = DigestSettings::from_config(&config);
        assert_eq!(settings.lookback, TimeDelta::hours(168));
        assert_eq!(settings.gap, TimeDelta::minutes(45));
        assert_eq!(settings.timezone, chrono_tz::America::Chicago);
        assert!(!settings.checkpointing);
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_timezone("Mars/Olympus_Mons"), Tz::UTC);
        assert_eq!(parse_timezone(" Europe/London "), chrono_tz::Europe::London);
    }
}
