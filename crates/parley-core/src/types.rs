use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Which backend produced an assistant response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// General streaming query.
    General,
    /// Query grounded in an uploaded document.
    Document,
    /// Image analysis.
    Image,
    /// The request failed.
    Error,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Document => "document",
            Self::Image => "image",
            Self::Error => "error",
        }
    }

    /// Parse the `query_type` label returned by the backend.
    ///
    /// Accepts both the short form (`document`) and the interaction form
    /// (`document_query`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" | "general_query" => Some(Self::General),
            "document" | "document_query" => Some(Self::Document),
            "image" | "image_query" => Some(Self::Image),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// The interaction type recorded when a query of this kind settles.
    pub fn interaction_type(&self) -> InteractionType {
        match self {
            Self::General => InteractionType::GeneralQuery,
            Self::Document => InteractionType::DocumentQuery,
            Self::Image => InteractionType::ImageQuery,
            Self::Error => InteractionType::Error,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of row written to the interactions table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    GeneralQuery,
    DocumentQuery,
    ImageQuery,
    NewChat,
    Error,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeneralQuery => "general_query",
            Self::DocumentQuery => "document_query",
            Self::ImageQuery => "image_query",
            Self::NewChat => "new_chat",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Rows
// =============================================================================

/// One row of the interactions table.
///
/// `interaction_type` stays a plain string on the read side so rows written
/// by other clients with unknown types still aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    pub interaction_type: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub response_time: Option<f64>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub interaction_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InteractionRecord {
    /// Start a record of the given type, timestamped now.
    pub fn new(interaction_type: InteractionType, user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            interaction_type: interaction_type.as_str().to_string(),
            query: None,
            response: None,
            response_time: None,
            tokens_used: None,
            interaction_id: None,
            language: None,
            user_agent: Some(client_user_agent()),
            created_at: Utc::now(),
        }
    }
}

/// One row of the sessions table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl SessionRecord {
    /// Duration in seconds, or `None` while the session is open.
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }
}

/// User agent reported by this client in telemetry rows.
pub fn client_user_agent() -> String {
    format!(
        "parley/{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
