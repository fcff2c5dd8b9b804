//! Date/time types shared by all Guardian crates

use chrono::{DateTime, NaiveDateTime, Utc};

/// Standard UTC DateTime type used across all Guardian crates
///
/// Serializes as ISO 8601 with 'Z' suffix, e.g. `2024-01-02T02:00:00Z`.
pub type UtcDateTime = DateTime<Utc>;

/// Parse a timestamp supplied by an operator.
///
/// Accepts:
/// - `2024-01-15T14:30:00Z` (UTC)
/// - `2024-01-15T14:30:00+02:00` (converted to UTC)
/// - `2024-01-15T14:30:00` and `2024-01-15 14:30` (naive, assumed UTC)
pub fn parse_utc(input: &str) -> Option<UtcDateTime> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
}
