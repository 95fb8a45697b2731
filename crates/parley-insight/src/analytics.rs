//! Pure aggregation over interaction and session rows.
//!
//! Every function takes its inputs by reference and performs no I/O. Time
//! windows are measured against an explicit `now`.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parley_core::{InteractionRecord, SessionRecord};

use crate::agent;
use crate::types::{AnalyticsSnapshot, DailyCount};

const UNKNOWN_LANGUAGE: &str = "unknown";

/// Rows created within `window` before `now` (inclusive).
pub fn count_since(rows: &[InteractionRecord], now: DateTime<Utc>, window: Duration) -> usize {
    let cutoff = now - window;
    rows.iter().filter(|r| r.created_at >= cutoff).count()
}

/// Distinct non-null user ids.
pub fn unique_users(rows: &[InteractionRecord]) -> usize {
    rows.iter()
        .filter_map(|r| r.user_id.as_deref())
        .collect::<HashSet<_>>()
        .len()
}

/// Mean response time in seconds. Rows without a value count as zero.
pub fn average_response_time(rows: &[InteractionRecord]) -> f64 {
    let total: f64 = rows.iter().map(|r| r.response_time.unwrap_or(0.0)).sum();
    total / rows.len() as f64
}

pub fn count_by_type(rows: &[InteractionRecord]) -> BTreeMap<String, usize> {
    tally(rows.iter().map(|r| r.interaction_type.clone()))
}

/// Queries per UTC day, oldest first.
pub fn daily_usage(rows: &[InteractionRecord]) -> Vec<DailyCount> {
    tally(rows.iter().map(|r| r.created_at.format("%Y-%m-%d").to_string()))
        .into_iter()
        .map(|(date, queries)| DailyCount { date, queries })
        .collect()
}

pub fn language_distribution(rows: &[InteractionRecord]) -> BTreeMap<String, usize> {
    tally(rows.iter().map(|r| {
        r.language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(UNKNOWN_LANGUAGE)
            .to_string()
    }))
}

pub fn device_distribution(rows: &[InteractionRecord]) -> BTreeMap<String, usize> {
    tally(user_agents(rows).map(|ua| agent::device_type(ua).as_str().to_string()))
}

pub fn browser_distribution(rows: &[InteractionRecord]) -> BTreeMap<String, usize> {
    tally(user_agents(rows).map(agent::browser_name))
}

pub fn os_distribution(rows: &[InteractionRecord]) -> BTreeMap<String, usize> {
    tally(user_agents(rows).map(agent::os_name))
}

/// Mean duration in seconds of sessions that have ended.
pub fn average_session_duration(sessions: &[SessionRecord]) -> f64 {
    let durations: Vec<f64> = sessions.iter().filter_map(SessionRecord::duration_secs).collect();
    durations.iter().sum::<f64>() / durations.len() as f64
}

/// Compute every aggregate at once.
pub fn snapshot(
    interactions: &[InteractionRecord],
    sessions: &[SessionRecord],
    now: DateTime<Utc>,
) -> AnalyticsSnapshot {
    AnalyticsSnapshot {
        total: interactions.len(),
        last_24h: count_since(interactions, now, Duration::hours(24)),
        last_7d: count_since(interactions, now, Duration::days(7)),
        unique_users: unique_users(interactions),
        avg_response_time: average_response_time(interactions),
        by_type: count_by_type(interactions),
        daily_usage: daily_usage(interactions),
        language_distribution: language_distribution(interactions),
        device_distribution: device_distribution(interactions),
        browser_distribution: browser_distribution(interactions),
        os_distribution: os_distribution(interactions),
        avg_session_duration: average_session_duration(sessions),
        generated_at: now,
    }
}

fn user_agents(rows: &[InteractionRecord]) -> impl Iterator<Item = &str> {
    rows.iter()
        .filter_map(|r| r.user_agent.as_deref())
        .filter(|ua| !ua.trim().is_empty())
}

fn tally(keys: impl Iterator<Item = String>) -> BTreeMap<String, usize> {
    keys.fold(BTreeMap::new(), |mut acc, key| {
        *acc.entry(key).or_insert(0) += 1;
        acc
    })
}
