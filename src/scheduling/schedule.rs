//! Five-field cron expressions
//!
//! Supports `*`, `*/n`, single values, ranges `a-b`, stepped ranges `a-b/n`
//! and comma-separated lists in each of minute, hour, day-of-month, month
//! and day-of-week. All times are UTC.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use thiserror::Error;

/// Give up searching for a fire time after this many years
const MAX_SEARCH_YEARS: i32 = 5;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },
}

/// Parsed cron schedule. Each field is a bitmask of permitted values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidExpression {
            expr: expr.to_string(),
            reason,
        };

        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", parts.len())));
        }

        let minutes = parse_field(parts[0], 0, 59).map_err(|e| invalid(format!("minute: {e}")))?;
        let hours = parse_field(parts[1], 0, 23).map_err(|e| invalid(format!("hour: {e}")))?;
        let days_of_month =
            parse_field(parts[2], 1, 31).map_err(|e| invalid(format!("day-of-month: {e}")))?;
        let months = parse_field(parts[3], 1, 12).map_err(|e| invalid(format!("month: {e}")))?;
        let mut days_of_week =
            parse_field(parts[4], 0, 7).map_err(|e| invalid(format!("day-of-week: {e}")))?;

        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expr: expr.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`, or `None` if the expression
    /// never matches (e.g. February 31st).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = after.year() + MAX_SEARCH_YEARS;

        while t.year() <= horizon {
            if !has_bit(self.months, t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }

            if !self.day_matches(t) {
                t = t.date_naive().and_hms_opt(0, 0, 0)?.and_utc() + Duration::days(1);
                continue;
            }

            if !has_bit(self.hours, t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }

            if !has_bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }

            return Some(t);
        }

        None
    }

    /// Time to wait from `now` until the next fire time
    pub fn until_next(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let next = self.next_after(now)?;
        (next - now).to_std().ok()
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = has_bit(self.days_of_month, t.day());
        let dow = has_bit(self.days_of_week, t.weekday().num_days_from_sunday());

        // Classic cron: when both day fields are restricted either may match
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

fn has_bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, String> {
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("invalid step '{step}'"))?;
                (range, step)
            }
            None => (part, 1),
        };
        if step == 0 {
            return Err("step must be positive".to_string());
        }

        let parse_value = |s: &str| -> Result<u32, String> {
            s.parse::<u32>().map_err(|_| format!("invalid value '{s}'"))
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a)?, parse_value(b)?)
        } else {
            let v = parse_value(range)?;
            // "a/n" means "from a to the end in steps of n"
            if step > 1 {
                (v, max)
            } else {
                (v, v)
            }
        };

        if lo < min || hi > max {
            return Err(format!("value out of range ({min}-{max})"));
        }
        if lo > hi {
            return Err(format!("empty range {lo}-{hi}"));
        }

        for v in (lo..=hi).step_by(step as usize) {
            mask |= 1u64 << v;
        }
    }

    Ok(mask)
}
