//! Interaction and session telemetry.
//!
//! Rows go to PostgREST tables. Recording is best-effort: callers use
//! [`log_best_effort`] and never see a failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::config::TelemetryConfig;
use parley_core::{InteractionRecord, SessionRecord};
use reqwest::{Client, RequestBuilder};
use serde_json::json;
use tracing::{debug, warn};

use crate::backend::ensure_success;
use crate::error::ChatError;

/// Destination for interaction and session rows.
#[async_trait]
pub trait InteractionSink: Send + Sync {
    async fn log_interaction(&self, record: &InteractionRecord) -> Result<(), ChatError>;

    async fn start_session(&self, session: &SessionRecord) -> Result<(), ChatError>;

    async fn end_session(&self, session_id: &str, end_time: DateTime<Utc>) -> Result<(), ChatError>;
}

/// Sink used when telemetry is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl InteractionSink for NullSink {
    async fn log_interaction(&self, _record: &InteractionRecord) -> Result<(), ChatError> {
        Ok(())
    }

    async fn start_session(&self, _session: &SessionRecord) -> Result<(), ChatError> {
        Ok(())
    }

    async fn end_session(&self, _session_id: &str, _end_time: DateTime<Utc>) -> Result<(), ChatError> {
        Ok(())
    }
}

/// PostgREST-backed sink.
#[derive(Clone)]
pub struct RestTelemetry {
    client: Client,
    config: TelemetryConfig,
}

impl RestTelemetry {
    /// Create a new sink writing to the tables named in `config`.
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url.trim_end_matches('/'), table)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header("Prefer", "return=minimal")
    }
}

#[async_trait]
impl InteractionSink for RestTelemetry {
    async fn log_interaction(&self, record: &InteractionRecord) -> Result<(), ChatError> {
        let url = self.table_url(&self.config.interactions_table);
        let request = self.authorize(self.client.post(&url)).json(record);
        ensure_success(request.send().await?).await?;
        debug!(interaction_type = %record.interaction_type, "Interaction logged");
        Ok(())
    }

    async fn start_session(&self, session: &SessionRecord) -> Result<(), ChatError> {
        let url = self.table_url(&self.config.sessions_table);
        let request = self.authorize(self.client.post(&url)).json(session);
        ensure_success(request.send().await?).await?;
        debug!(session_id = %session.session_id, "Session started");
        Ok(())
    }

    async fn end_session(&self, session_id: &str, end_time: DateTime<Utc>) -> Result<(), ChatError> {
        let url = self.table_url(&self.config.sessions_table);
        let request = self
            .authorize(self.client.patch(&url))
            .query(&[("session_id", format!("eq.{}", session_id))])
            .json(&json!({ "end_time": end_time }));
        ensure_success(request.send().await?).await?;
        debug!(session_id, "Session ended");
        Ok(())
    }
}

/// Build the sink the configuration asks for.
pub fn sink_from_config(config: &TelemetryConfig) -> Arc<dyn InteractionSink> {
    if config.enabled {
        Arc::new(RestTelemetry::new(config.clone()))
    } else {
        Arc::new(NullSink)
    }
}

/// Record an interaction, logging instead of propagating failures.
pub async fn log_best_effort(sink: &dyn InteractionSink, record: &InteractionRecord) {
    if let Err(e) = sink.log_interaction(record).await {
        warn!(
            interaction_type = %record.interaction_type,
            error = %e,
            "Failed to log interaction"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::InteractionType;

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            base_url: "https://project.example.co/".to_string(),
            api_key: "anon".to_string(),
            ..TelemetryConfig::default()
        }
    }

    #[test]
    fn test_table_url() {
        let sink = RestTelemetry::new(config());
        assert_eq!(
            sink.table_url("interactions"),
            "https://project.example.co/rest/v1/interactions"
        );
    }

    #[test]
    fn test_authorize_sets_headers() {
        let sink = RestTelemetry::new(config());
        let request = sink
            .authorize(sink.client.post("https://project.example.co/rest/v1/sessions"))
            .build()
            .unwrap();
        let headers = request.headers();
        assert_eq!(headers["apikey"], "anon");
        assert_eq!(headers["authorization"], "Bearer anon");
        assert_eq!(headers["prefer"], "return=minimal");
    }

    #[tokio::test]
    async fn test_null_sink_accepts_everything() {
        let sink = NullSink;
        let record = InteractionRecord::new(InteractionType::NewChat, "u1");
        assert!(sink.log_interaction(&record).await.is_ok());
        assert!(sink.end_session("s1", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_best_effort_swallows_transport_failure() {
        let sink = RestTelemetry::new(TelemetryConfig {
            enabled: true,
            // Nothing listens on port 9 locally
            base_url: "http://127.0.0.1:9".to_string(),
            ..TelemetryConfig::default()
        });
        let record = InteractionRecord::new(InteractionType::Error, "u1");
        log_best_effort(&sink, &record).await;
    }
}
