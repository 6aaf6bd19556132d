//! Time-based triggers for scheduled runs.

use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

/// Source of fire times for a scheduled job.
pub trait Trigger: Send + Sync {
    /// First fire time strictly after `now`, or `None` when the trigger is
    /// exhausted.
    fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;

    fn describe(&self) -> String;
}

/// Cron expression evaluated in a fixed timezone.
///
/// Accepts classic five-field crontab syntax (`min hour dom mon dow`, with
/// `0`/`7` meaning Sunday) as well as the six/seven-field form with a
/// leading seconds column.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl CronTrigger {
    pub fn parse(expression: &str, timezone: Tz) -> Result<Self> {
        let normalized = normalize_expression(expression)?;
        let schedule = Schedule::from_str(&normalized)
            .with_context(|| format!("invalid cron expression '{expression}'"))?;
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl Trigger for CronTrigger {
    fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.timezone))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }

    fn describe(&self) -> String {
        format!("cron '{}' ({})", self.expression, self.timezone)
    }
}

fn normalize_expression(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = crontab_day_of_week(fields[4])?;
            Ok(format!(
                "0 {} {} {} {} {dow}",
                fields[0], fields[1], fields[2], fields[3]
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        0 => bail!("cron expression is empty"),
        n => bail!("cron expression '{expression}' has {n} fields, expected 5, 6 or 7"),
    }
}

/// Crontab numbers days from Sunday = 0; translate numeric days to names
/// so the schedule parser cannot misread them.
fn crontab_day_of_week(field: &str) -> Result<String> {
    if field.contains('*') || field.contains('/') || field == "?" {
        return Ok(field.to_string());
    }

    let mut items = Vec::new();
    for item in field.split(',') {
        let mut bounds = Vec::new();
        for bound in item.split('-') {
            bounds.push(day_name(bound)?);
        }
        items.push(bounds.join("-"));
    }
    Ok(items.join(","))
}

fn day_name(token: &str) -> Result<String> {
    const NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    if token.chars().all(|c| c.is_ascii_alphabetic()) && !token.is_empty() {
        return Ok(token.to_string());
    }
    let day: usize = token
        .parse()
        .with_context(|| format!("invalid day of week '{token}'"))?;
    match day {
        0..=6 => Ok(NAMES[day].to_string()),
        7 => Ok(NAMES[0].to_string()),
        _ => bail!("day of week {day} out of range 0-7"),
    }
}
