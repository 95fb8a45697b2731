//! Parley Insight crate - usage analytics over recorded interactions.
//!
//! Provides:
//! - Pure aggregation of interaction and session rows into a snapshot
//! - User-agent classification (device, browser, OS)
//! - Row sources backed by PostgREST tables or JSON exports

pub mod agent;
pub mod analytics;
pub mod error;
pub mod source;
pub mod types;

pub use error::InsightError;
pub use source::{AnalyticsService, AnalyticsSource, JsonFileSource, RestAnalyticsSource};
pub use types::{AnalyticsSnapshot, DailyCount, DeviceType};
