//! Sweep cadence — five-field cron expressions evaluated in UTC.
//!
//! Supported field syntax: `*`, `n`, `a-b`, `*/s`, `a-b/s`, `n/s`, and
//! comma-separated lists of those. Day-of-week accepts 0-7 with both 0 and 7
//! meaning Sunday. When day-of-month and day-of-week are both restricted a
//! day matches if either field matches.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Timelike, Utc};
use regex::Regex;

use crate::error::{ConfigError, ConfigResult};

/// How far ahead `next_after` searches before giving up on a schedule that
/// can never fire (e.g. `0 0 30 2 *`).
const SEARCH_YEARS: i32 = 5;

static STEP_MINUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\*/(\d+)\s+\*\s+\*\s+\*\s+\*\s*$").expect("static regex is valid")
});

/// Minutes between sweeps when the expression has the `*/n * * * *` shape.
///
/// Anything else (fixed minutes, hour restrictions, ...) has no single
/// interval and yields `None`.
pub fn interval_minutes(expr: &str) -> Option<u32> {
    let caps = STEP_MINUTES.captures(expr)?;
    caps[1].parse::<u32>().ok().filter(|n| *n > 0)
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
    day_restricted: bool,
    weekday_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> ConfigResult<Self> {
        let invalid = |reason: String| ConfigError::InvalidSchedule {
            expr: expr.to_string(),
            reason,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields.as_slice() else {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        };

        let mut weekdays = parse_field(weekday, 0, 7).map_err(&invalid)?;
        // 7 is an alias for Sunday.
        if weekdays & (1 << 7) != 0 {
            weekdays = (weekdays | 1) & !(1 << 7);
        }

        Ok(Self {
            expr: expr.trim().to_string(),
            minutes: parse_field(minute, 0, 59).map_err(&invalid)?,
            hours: parse_field(hour, 0, 23).map_err(&invalid)?,
            days: parse_field(day, 1, 31).map_err(&invalid)?,
            months: parse_field(month, 1, 12).map_err(&invalid)?,
            weekdays,
            day_restricted: !day.starts_with('*'),
            weekday_restricted: !weekday.starts_with('*'),
        })
    }

    /// The expression this schedule was parsed from.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First matching minute strictly after `after`, or `None` if the
    /// schedule does not fire within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = t.year() + SEARCH_YEARS;

        while t.year() <= limit {
            if !bit(self.months, t.month()) {
                t = start_of_next_month(t)?;
            } else if !self.day_matches(t) {
                t = start_of_next_day(t)?;
            } else if !bit(self.hours, t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
            } else if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
            } else {
                return Some(t);
            }
        }
        None
    }

    /// Time to wait from `now` until the next fire.
    pub fn until_next(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let next = self.next_after(now)?;
        (next - now).to_std().ok()
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = bit(self.days, t.day());
        let dow = bit(self.weekdays, t.weekday().num_days_from_sunday());
        if self.day_restricted && self.weekday_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

fn bit(set: u64, value: u32) -> bool {
    set & (1u64 << value) != 0
}

fn start_of_next_day(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let date = t.date_naive().checked_add_days(Days::new(1))?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Parse one cron field into a bitset over `min..=max`.
fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, String> {
    let mut set = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step {step:?}"))?;
                if step == 0 {
                    return Err("step must be at least 1".to_string());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, min, max)?, parse_value(hi, min, max)?)
        } else {
            let value = parse_value(range, min, max)?;
            // `n/s` runs from n to the end of the field.
            (value, if step.is_some() { max } else { value })
        };

        if lo > hi {
            return Err(format!("range {lo}-{hi} is reversed"));
        }
        for value in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            set |= 1u64 << value;
        }
    }
    Ok(set)
}

fn parse_value(raw: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = raw.parse().map_err(|_| format!("invalid value {raw:?}"))?;
    if value < min || value > max {
        return Err(format!("value {value} outside {min}-{max}"));
    }
    Ok(value)
}
