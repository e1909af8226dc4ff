//! Schedule parsing and next-occurrence calculation.
//!
//! Supports standard 5-field cron expressions
//! (`minute hour day-of-month month day-of-week`), shortcuts
//! (@daily, @hourly, etc.), and interval expressions (@every 5m).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// A schedule describing when a job fires.
///
/// Jobs persist the raw expression string; a `Schedule` is the parsed,
/// in-memory form the timer loop works with.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// The timezone for this schedule.
    timezone: String,
    /// Parsed schedule kind.
    kind: ScheduleKind,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    /// Standard cron schedule.
    Cron(Box<CronSchedule>),
    /// Interval-based schedule (e.g., @every 5m).
    Interval(std::time::Duration),
}

impl Schedule {
    /// Parse a schedule expression in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day-of-month month day-of-week`,
    ///   each field accepting `*`, numeric ranges, steps, and comma lists
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 30s`, `@every 1h30m`
    pub fn parse(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::parse_in_timezone(expression, "UTC")
    }

    /// Parse a schedule expression evaluated in a specific timezone.
    pub fn parse_in_timezone(
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone = timezone.into();

        timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.clone()))?;

        let kind = Self::parse_kind(expression.trim())?;

        Ok(Self {
            expression,
            timezone,
            kind,
        })
    }

    fn parse_kind(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        if let Some(rest) = expression.strip_prefix("@every ") {
            return Ok(ScheduleKind::Interval(Self::parse_duration(rest.trim())?));
        }

        let cron_expr = match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 1 1 *".to_string(),
            "@monthly" => "0 0 1 * *".to_string(),
            "@weekly" => "0 0 * * SUN".to_string(),
            "@daily" | "@midnight" => "0 0 * * *".to_string(),
            "@hourly" => "0 * * * *".to_string(),
            s if s.starts_with('@') => {
                return Err(ScheduleError::InvalidCron(format!(
                    "unknown shortcut: {}",
                    expression
                )));
            }
            _ => {
                let fields = expression.split_whitespace().count();
                if fields != 5 {
                    return Err(ScheduleError::InvalidCron(format!(
                        "expected 5 fields, got {}",
                        fields
                    )));
                }
                expression.to_string()
            }
        };

        // The cron crate wants a seconds field; pin it to :00.
        let schedule = CronSchedule::from_str(&format!("0 {}", cron_expr))
            .map_err(|e| ScheduleError::InvalidCron(e.to_string()))?;

        Ok(ScheduleKind::Cron(Box::new(schedule)))
    }

    /// Parse a duration string like "30s", "5m", "1h30m", "1d".
    fn parse_duration(s: &str) -> Result<std::time::Duration, ScheduleError> {
        let mut total_secs: u64 = 0;
        let mut digits = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let num: u64 = digits
                .parse()
                .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
            digits.clear();
            let unit = match c {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 86400,
                _ => return Err(ScheduleError::InvalidInterval(s.to_string())),
            };
            total_secs = num
                .checked_mul(unit)
                .and_then(|secs| total_secs.checked_add(secs))
                .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))?;
        }

        if total_secs == 0 || !digits.is_empty() {
            return Err(ScheduleError::InvalidInterval(s.to_string()));
        }

        Ok(std::time::Duration::from_secs(total_secs))
    }

    /// Get the next occurrence strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(self.timezone.clone()))?;

        match &self.kind {
            ScheduleKind::Cron(schedule) => schedule
                .after(&after.with_timezone(&tz))
                .next()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or(ScheduleError::NoMoreOccurrences),
            ScheduleKind::Interval(duration) => {
                let step = chrono::Duration::from_std(*duration)
                    .map_err(|_| ScheduleError::InvalidInterval(self.expression.clone()))?;
                Ok(after + step)
            }
        }
    }

    /// Get the next occurrence from now.
    pub fn next(&self) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_after(Utc::now())
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }
}
