use chrono::{DateTime, Local};

use super::tracker::DisplayState;

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_updated_display(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

pub(crate) fn build_progress_gauge(state: &DisplayState) -> (f64, String) {
    (
        state.bar_ratio(),
        format!("{}/{} ({}%)", state.watched, state.total, state.percent),
    )
}
