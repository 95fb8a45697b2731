//! Plain-text reports for the terminal.

use std::collections::BTreeMap;
use std::fmt::Write;

use parley_chat::{Exchange, UsageCounters};
use parley_insight::AnalyticsSnapshot;

/// Multi-line report printed by `parley analytics`.
pub fn format_snapshot(snapshot: &AnalyticsSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Usage analytics ({})",
        snapshot.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out, "  Total interactions   {}", snapshot.total);
    let _ = writeln!(out, "  Last 24 hours        {}", snapshot.last_24h);
    let _ = writeln!(out, "  Last 7 days          {}", snapshot.last_7d);
    let _ = writeln!(out, "  Unique users         {}", snapshot.unique_users);
    let _ = writeln!(
        out,
        "  Avg response time    {}",
        seconds(snapshot.avg_response_time)
    );
    let _ = writeln!(
        out,
        "  Avg session length   {}",
        seconds(snapshot.avg_session_duration)
    );

    section(&mut out, "By type", &snapshot.by_type);
    if !snapshot.daily_usage.is_empty() {
        let _ = writeln!(out, "\nDaily usage");
        for day in &snapshot.daily_usage {
            let _ = writeln!(out, "  {}  {}", day.date, day.queries);
        }
    }
    section(&mut out, "Languages", &snapshot.language_distribution);
    section(&mut out, "Devices", &snapshot.device_distribution);
    section(&mut out, "Browsers", &snapshot.browser_distribution);
    section(&mut out, "Operating systems", &snapshot.os_distribution);
    out
}

/// Session counters shown by `/usage`.
pub fn format_usage(usage: &UsageCounters) -> String {
    let average = if usage.queries == 0 {
        f64::NAN
    } else {
        usage.total_response_time / usage.queries as f64
    };
    format!(
        "{} queries, {} errors, {} tokens, avg response {}",
        usage.queries,
        usage.errors,
        usage.tokens_used,
        seconds(average)
    )
}

/// Characters of each prompt shown by `/history`.
const PREVIEW_CHARS: usize = 30;

/// One numbered line per exchange, oldest first.
pub fn format_history(exchanges: &[Exchange]) -> String {
    if exchanges.is_empty() {
        return "No messages yet.".to_string();
    }
    let mut out = String::new();
    for (n, exchange) in exchanges.iter().enumerate() {
        let _ = write!(out, "{:>3}. {}", n + 1, preview(&exchange.input_text));
        if exchange.pending {
            out.push_str("  (waiting)");
        } else if exchange.error_flag {
            out.push_str("  (failed)");
        }
        out.push('\n');
    }
    out.pop();
    out
}

fn preview(input: &str) -> String {
    let mut chars = input.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

fn section(out: &mut String, title: &str, counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{}", title);
    let width = counts.keys().map(|k| k.chars().count()).max().unwrap_or(0);
    for (key, count) in counts {
        let _ = writeln!(out, "  {:<width$}  {}", key, count, width = width);
    }
}

fn seconds(value: f64) -> String {
    if value.is_finite() {
        format!("{:.2}s", value)
    } else {
        "n/a".to_string()
    }
}
