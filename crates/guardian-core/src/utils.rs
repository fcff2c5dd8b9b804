//! Common utility functions

use uuid::Uuid;

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Generate a new UUID v4
pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}

/// Mask sensitive data for logging
pub fn mask_sensitive(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "***".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

/// Format a byte count using base-1024 units.
///
/// The largest unit whose value is at least 1 is chosen and the value is
/// rendered with two decimals; zero renders as `0 Bytes`.
///
/// ```
/// use guardian_core::format_file_size;
///
/// assert_eq!(format_file_size(0), "0 Bytes");
/// assert_eq!(format_file_size(1536), "1.50 KB");
/// assert_eq!(format_file_size(1_073_741_824), "1.00 GB");
/// ```
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, SIZE_UNITS[unit])
}

/// Format a duration given in whole seconds.
///
/// ```
/// use guardian_core::format_duration;
///
/// assert_eq!(format_duration(45), "45 seconds");
/// assert_eq!(format_duration(125), "2 mins 5 secs");
/// assert_eq!(format_duration(3661), "1 hour 1 min");
/// ```
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{} {}", seconds, plural(seconds, "second"))
    } else if seconds < 3600 {
        let minutes = seconds / 60;
        let remaining = seconds % 60;
        format!(
            "{} {} {} {}",
            minutes,
            plural(minutes, "min"),
            remaining,
            plural(remaining, "sec")
        )
    } else {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        format!(
            "{} {} {} {}",
            hours,
            plural(hours, "hour"),
            minutes,
            plural(minutes, "min")
        )
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        unit.to_string()
    } else {
        format!("{}s", unit)
    }
}
