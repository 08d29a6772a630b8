use chrono::{DateTime, Utc};

/// Returns "{remaining}% remaining" where remaining = 100 - used, rounded to nearest integer.
pub fn format_remaining_percent(used_percent: f64) -> String {
    let remaining = (100.0 - used_percent).max(0.0).round() as u64;
    format!("{}% remaining", remaining)
}

/// Returns "in Xh Ym" for `at` relative to `now`, or "now" if it has passed.
/// If more than 24 hours away, includes days.
pub fn format_countdown(at: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let total_seconds = (*at - *now).num_seconds();

    if total_seconds <= 0 {
        return "now".to_string();
    }

    let total_minutes = total_seconds / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 24 {
        let days = hours / 24;
        let remaining_hours = hours % 24;
        if remaining_hours == 0 {
            format!("in {}d", days)
        } else {
            format!("in {}d {}h", days, remaining_hours)
        }
    } else if hours > 0 {
        format!("in {}h {}m", hours, minutes)
    } else {
        format!("in {}m", total_minutes.max(1))
    }
}

/// Returns "[████████░░░░]" where █ = remaining portion, ░ = used portion.
/// Width is the number of block characters inside the brackets (default 12).
pub fn format_usage_bar(used_percent: f64, width: usize) -> String {
    let used_percent = used_percent.clamp(0.0, 100.0);
    let used_blocks = ((used_percent / 100.0) * width as f64).round() as usize;
    let remaining_blocks = width.saturating_sub(used_blocks);

    let filled: String = "█".repeat(remaining_blocks);
    let empty: String = "░".repeat(used_blocks);

    format!("[{}{}]", filled, empty)
}

pub fn format_tokens(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        format!("{}", count)
    }
}

/// Returns "12.3K tok/min".
pub fn format_rate(tokens_per_minute: f64) -> String {
    let rounded = tokens_per_minute.max(0.0).round() as u64;
    format!("{} tok/min", format_tokens(rounded))
}

/// Returns "12.5h / 80h".
pub fn format_hours(used: f64, limit: f64) -> String {
    format!("{:.1}h / {}h", used, limit)
}
