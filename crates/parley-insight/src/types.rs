use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Device class derived from a user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "Mobile",
            Self::Tablet => "Tablet",
            Self::Desktop => "Desktop",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queries on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`
    pub date: String,
    pub queries: usize,
}

/// Aggregate view over interaction and session rows at one instant.
///
/// Averages are `NaN` when there is nothing to average. They serialize as
/// `null` and read back as `NaN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total: usize,
    pub last_24h: usize,
    pub last_7d: usize,
    pub unique_users: usize,
    /// Seconds.
    #[serde(deserialize_with = "nan_if_null")]
    pub avg_response_time: f64,
    pub by_type: BTreeMap<String, usize>,
    /// Sorted by date.
    pub daily_usage: Vec<DailyCount>,
    pub language_distribution: BTreeMap<String, usize>,
    pub device_distribution: BTreeMap<String, usize>,
    pub browser_distribution: BTreeMap<String, usize>,
    pub os_distribution: BTreeMap<String, usize>,
    /// Seconds, over closed sessions only.
    #[serde(deserialize_with = "nan_if_null")]
    pub avg_session_duration: f64,
    pub generated_at: DateTime<Utc>,
}

fn nan_if_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}
