//! Where interaction and session rows come from.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parley_core::config::TelemetryConfig;
use parley_core::{InteractionRecord, SessionRecord};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::analytics;
use crate::error::InsightError;
use crate::types::AnalyticsSnapshot;

/// Read access to the raw telemetry rows.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn interactions(&self) -> Result<Vec<InteractionRecord>, InsightError>;

    async fn sessions(&self) -> Result<Vec<SessionRecord>, InsightError>;
}

// =============================================================================
// PostgREST
// =============================================================================

/// Reads whole tables from a PostgREST endpoint.
#[derive(Clone)]
pub struct RestAnalyticsSource {
    client: Client,
    config: TelemetryConfig,
}

impl RestAnalyticsSource {
    /// Create a new source reading the telemetry tables named in `config`.
    pub fn new(config: TelemetryConfig) -> Result<Self, InsightError> {
        if config.base_url.trim().is_empty() {
            return Err(InsightError::Config(
                "telemetry.base_url is empty".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            config,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url.trim_end_matches('/'), table)
    }

    async fn fetch_table<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, InsightError> {
        let response = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*")])
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(InsightError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&message),
            });
        }

        let rows: Vec<T> = response.json().await?;
        debug!(table, rows = rows.len(), "Fetched table");
        Ok(rows)
    }
}

#[async_trait]
impl AnalyticsSource for RestAnalyticsSource {
    async fn interactions(&self) -> Result<Vec<InteractionRecord>, InsightError> {
        self.fetch_table(&self.config.interactions_table).await
    }

    async fn sessions(&self) -> Result<Vec<SessionRecord>, InsightError> {
        self.fetch_table(&self.config.sessions_table).await
    }
}

/// Pull the `message` field out of a PostgREST error body, else the raw body.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

// =============================================================================
// JSON export files
// =============================================================================

/// Reads rows from JSON array exports on disk.
///
/// A missing sessions file means no sessions. A missing interactions file
/// is an error.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    interactions_path: PathBuf,
    sessions_path: Option<PathBuf>,
}

impl JsonFileSource {
    /// Create a new source over JSON exports. Without `sessions_path` there
    /// are no sessions.
    pub fn new(interactions_path: impl Into<PathBuf>, sessions_path: Option<PathBuf>) -> Self {
        Self {
            interactions_path: interactions_path.into(),
            sessions_path,
        }
    }
}

#[async_trait]
impl AnalyticsSource for JsonFileSource {
    async fn interactions(&self) -> Result<Vec<InteractionRecord>, InsightError> {
        let content = tokio::fs::read_to_string(&self.interactions_path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn sessions(&self) -> Result<Vec<SessionRecord>, InsightError> {
        let Some(path) = &self.sessions_path else {
            return Ok(Vec::new());
        };
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Loads rows from a source and aggregates them.
///
/// Every call reloads; nothing is cached between snapshots.
pub struct AnalyticsService {
    source: Arc<dyn AnalyticsSource>,
}

impl AnalyticsService {
    /// Create a new service over `source`.
    pub fn new(source: Arc<dyn AnalyticsSource>) -> Self {
        Self { source }
    }

    /// Fetch both tables concurrently and aggregate them as of now.
    pub async fn snapshot(&self) -> Result<AnalyticsSnapshot, InsightError> {
        let (interactions, sessions) =
            tokio::try_join!(self.source.interactions(), self.source.sessions())?;
        info!(
            interactions = interactions.len(),
            sessions = sessions.len(),
            "Computing analytics snapshot"
        );
        Ok(analytics::snapshot(&interactions, &sessions, Utc::now()))
    }
}
