//! Formatting helpers shared by the dashboard and the tail printer.

use chrono::{DateTime, Local, Utc};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    format_relative_to(ts, Utc::now())
}

fn format_relative_to(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 1 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else {
        format!("{}d ago", duration.num_days())
    }
}

/// Format an optional timestamp as relative time, or "-" if missing.
pub fn format_relative_time_opt(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format_relative_time(ts),
        None => "-".to_string(),
    }
}

/// Local wall-clock time of an event, or a placeholder if unknown.
pub fn format_clock(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.with_timezone(&Local).format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

/// Render a reconnect delay compactly: "500ms", "2s", "1.5s".
pub fn format_delay_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(format_relative_to(now, now), "just now");
        assert_eq!(format_relative_to(now + Duration::seconds(5), now), "just now");
        assert_eq!(format_relative_to(now - Duration::seconds(42), now), "42s ago");
        assert_eq!(format_relative_to(now - Duration::minutes(3), now), "3m ago");
        assert_eq!(format_relative_to(now - Duration::hours(5), now), "5h ago");
        assert_eq!(format_relative_to(now - Duration::days(9), now), "9d ago");
    }

    #[test]
    fn test_missing_timestamp() {
        assert_eq!(format_relative_time_opt(None), "-");
    }

    #[test]
    fn test_delay_formatting() {
        assert_eq!(format_delay_ms(250), "250ms");
        assert_eq!(format_delay_ms(8000), "8s");
        assert_eq!(format_delay_ms(1500), "1.5s");
    }

    #[test]
    fn test_clock_shape() {
        let clock = format_clock(Some(Utc::now()));
        assert_eq!(clock.len(), 8);
        assert_eq!(clock.matches(':').count(), 2);
        assert_eq!(format_clock(None), "--:--:--");
    }
}
