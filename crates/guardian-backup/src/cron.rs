//! Standard five-field cron expressions: minute, hour, day-of-month, month,
//! day-of-week.
//!
//! Day-of-month and day-of-week combine with POSIX semantics: when both are
//! restricted (not `*`) a day matches if either matches, otherwise only the
//! restricted one applies. All computation is in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, Timelike};
use guardian_core::UtcDateTime;
use thiserror::Error;

/// Feb 29 occurrences can be eight years apart (2096 -> 2104).
const SEARCH_HORIZON_DAYS: u32 = 366 * 8 + 2;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("unknown descriptor '{0}'")]
    UnknownDescriptor(String),

    #[error("empty {0} field")]
    EmptyField(&'static str),

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} value {value} is outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid step '{value}' in {field} field")]
    InvalidStep { field: &'static str, value: String },
}

#[derive(Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    name_offset: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_offset: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_offset: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_offset: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    name_offset: 1,
};
// 7 is accepted as an alias for Sunday
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
    name_offset: 0,
};

/// A parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let source = expression.trim().to_string();
        let expanded = if source.starts_with('@') {
            expand_descriptor(&source)?
        } else {
            source.as_str()
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let minutes = parse_field(fields[0], MINUTE)?;
        let hours = parse_field(fields[1], HOUR)?;
        let days_of_month = parse_field(fields[2], DAY_OF_MONTH)?;
        let months = parse_field(fields[3], MONTH)?;
        let mut days_of_week = parse_field(fields[4], DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }
        let dom_restricted = fields[2] != "*";
        let dow_restricted = fields[4] != "*";

        Ok(Self {
            source,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted,
            dow_restricted,
        })
    }

    /// The expression as written by the caller
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the expression fires at the minute containing `at`
    pub fn matches(&self, at: UtcDateTime) -> bool {
        let date = at.date_naive();
        bit(self.minutes, at.minute())
            && bit(self.hours, at.hour())
            && bit(self.months, date.month())
            && self.day_matches(date)
    }

    /// The first fire time strictly after `after`, at minute precision.
    ///
    /// Returns `None` when the expression can never fire (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: UtcDateTime) -> Option<UtcDateTime> {
        let floor = after.with_second(0)?.with_nanosecond(0)?;
        let start = floor + Duration::minutes(1);
        let first_day = start.date_naive();

        let mut date = first_day;
        for _ in 0..SEARCH_HORIZON_DAYS {
            if bit(self.months, date.month()) && self.day_matches(date) {
                let (hour, minute) = if date == first_day {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };
                if let Some((h, m)) = self.first_time_from(hour, minute) {
                    return date.and_hms_opt(h, m, 0).map(|naive| naive.and_utc());
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// The next `count` fire times after `after`
    pub fn upcoming(&self, after: UtcDateTime, count: usize) -> Vec<UtcDateTime> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    fn first_time_from(&self, hour: u32, minute: u32) -> Option<(u32, u32)> {
        (hour..24).filter(|h| bit(self.hours, *h)).find_map(|h| {
            let first_minute = if h == hour { minute } else { 0 };
            (first_minute..60)
                .find(|m| bit(self.minutes, *m))
                .map(|m| (h, m))
        })
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Next fire time of `expression` strictly after `from`
pub fn next_fire(expression: &str, from: UtcDateTime) -> Result<Option<UtcDateTime>, CronError> {
    Ok(CronExpression::parse(expression)?.next_after(from))
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn expand_descriptor(descriptor: &str) -> Result<&'static str, CronError> {
    match descriptor.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(CronError::UnknownDescriptor(descriptor.to_string())),
    }
}

fn parse_field(raw: &str, spec: FieldSpec) -> Result<u64, CronError> {
    if raw.is_empty() {
        return Err(CronError::EmptyField(spec.name));
    }

    let mut mask = 0u64;
    for part in raw.split(',') {
        if part.is_empty() {
            return Err(CronError::EmptyField(spec.name));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<u32>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| CronError::InvalidStep {
                        field: spec.name,
                        value: step.to_string(),
                    })?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((low, high)) = range.split_once('-') {
            (parse_value(low, spec)?, parse_value(high, spec)?)
        } else {
            let value = parse_value(range, spec)?;
            // `5/15` means "from 5 to the maximum, every 15"
            if step.is_some() {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        if start > end {
            return Err(CronError::InvalidValue {
                field: spec.name,
                value: part.to_string(),
            });
        }

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << value;
        }
    }

    Ok(mask)
}

fn parse_value(raw: &str, spec: FieldSpec) -> Result<u32, CronError> {
    let value = match raw.parse::<u32>() {
        Ok(value) => value,
        Err(_) => {
            let lowered = raw.to_ascii_lowercase();
            let index = spec
                .names
                .iter()
                .position(|name| *name == lowered)
                .ok_or_else(|| CronError::InvalidValue {
                    field: spec.name,
                    value: raw.to_string(),
                })?;
            index as u32 + spec.name_offset
        }
    };

    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}
