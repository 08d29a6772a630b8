use colored::{control, ColoredString, Colorize};

use burnwatch::core::formatter::{
    format_countdown, format_hours, format_rate, format_remaining_percent, format_tokens,
    format_usage_bar,
};
use burnwatch::core::models::alert::{Alert, Severity};
use burnwatch::core::models::rate::{BurnRateMetrics, Trend};
use burnwatch::core::models::snapshot::Snapshot;
use burnwatch::core::models::window::{SessionWindow, WeeklyQuota, WindowStatus};

const BAR_WIDTH: usize = 12;

/// Render a snapshot as a colored (or plain) string. Countdowns are relative
/// to the snapshot's own `generated_at`.
///
/// Layout:
/// ```text
///  Session #3 (active)
///   Budget   18% remaining [██░░░░░░░░░░]
///            612.0K / 750.0K tokens, resets in 2h 15m
///   Rate     10.0K tok/min, avg 9.5K tok/min, peak 12.0K tok/min (rising)
///   Exhausts in 14m, before reset
///   Standard 84% remaining [██████████░░]
///            12.5h / 80h, resets in 3d 4h
///   Alerts
///     #1 warning  Session budget 81% consumed
/// ```
pub fn render_snapshot(snapshot: &Snapshot, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();

    match &snapshot.session_window {
        Some(window) => render_window(&mut lines, window, snapshot),
        None => lines.push(" No session yet".bold().to_string()),
    }

    render_rate(&mut lines, &snapshot.burn_rate);

    if let Some(at) = &snapshot.predicted_exhaustion_at {
        let when = format_countdown(at, &snapshot.generated_at);
        let text = if snapshot.exhausts_before_reset {
            format!("{}, before reset", when).red()
        } else {
            format!("{}, after reset", when).normal()
        };
        lines.push(format!("  {} {}", "Exhausts".cyan(), text));
    }

    for quota in &snapshot.weekly_quotas {
        render_quota(&mut lines, quota, snapshot);
    }

    if !snapshot.active_alerts.is_empty() {
        lines.push(format!("  {}", "Alerts".cyan()));
        for alert in &snapshot.active_alerts {
            lines.push(render_alert(alert));
        }
    }

    if snapshot.degraded {
        lines.push(format!(
            "  {}",
            "Degraded: no recent events, rate assumed idle".yellow()
        ));
    }

    lines.join("\n")
}

fn render_window(lines: &mut Vec<String>, window: &SessionWindow, snapshot: &Snapshot) {
    let status = match window.status {
        WindowStatus::Active => "active".green(),
        WindowStatus::Expired => "expired".dimmed(),
        WindowStatus::Closed => "closed".dimmed(),
    };
    lines.push(format!(" {} ({})", format!("Session #{}", window.id).bold(), status));

    let used = window.used_percent();
    lines.push(format!(
        "  {}  {} {}",
        format!("{:<7}", "Budget").cyan(),
        color_by_remaining(used, &format_remaining_percent(used)),
        format_usage_bar(used, BAR_WIDTH).magenta()
    ));

    let mut detail = format!(
        "{} / {} tokens",
        format_tokens(window.tokens_consumed),
        format_tokens(window.budget_limit)
    );
    if window.is_active() {
        detail.push_str(&format!(
            ", resets {}",
            format_countdown(&window.ends_at, &snapshot.generated_at)
        ));
    }
    // 11 spaces to align under the percent/bar values
    lines.push(format!("           {}", detail.dimmed()));
}

fn render_rate(lines: &mut Vec<String>, rate: &BurnRateMetrics) {
    let trend = match rate.trend {
        Trend::Rising => "rising".red(),
        Trend::Falling => "falling".green(),
        Trend::Stable => "stable".normal(),
    };
    lines.push(format!(
        "  {}     {}, avg {}, peak {} ({})",
        "Rate".cyan(),
        format_rate(rate.current_rate),
        format_rate(rate.average_rate),
        format_rate(rate.peak_rate),
        trend
    ));
}

fn render_quota(lines: &mut Vec<String>, quota: &WeeklyQuota, snapshot: &Snapshot) {
    let used = quota.used_percent();
    lines.push(format!(
        "  {} {} {}",
        format!("{:<8}", quota.model_tier.label()).cyan(),
        color_by_remaining(used, &format_remaining_percent(used)),
        format_usage_bar(used, BAR_WIDTH).magenta()
    ));
    let detail = format!(
        "{}, resets {}",
        format_hours(quota.hours_consumed, quota.hours_limit),
        format_countdown(&quota.period_end, &snapshot.generated_at)
    );
    lines.push(format!("           {}", detail.dimmed()));
}

fn render_alert(alert: &Alert) -> String {
    let severity = alert.severity.to_string();
    let colored_severity: ColoredString = match alert.severity {
        Severity::Critical => severity.red().bold(),
        Severity::Warning => severity.yellow(),
        Severity::Info => severity.normal(),
    };
    format!("    {} {:<8} {}", alert.id, colored_severity, alert.message)
}

/// Color the percent string green/yellow/red based on remaining percentage.
fn color_by_remaining(used_percent: f64, text: &str) -> ColoredString {
    let remaining = 100.0 - used_percent;
    if remaining >= 25.0 {
        text.green()
    } else if remaining >= 10.0 {
        text.yellow()
    } else {
        text.red()
    }
}
