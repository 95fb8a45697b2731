use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley client.
///
/// Loaded from `~/.parley/config.toml` by default. Each section corresponds
/// to one external collaborator or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check the values that cannot be defaulted meaningfully.
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.backend.base_url) {
            return Err(ParleyError::Config(format!(
                "backend.base_url must be an http(s) URL, got '{}'",
                self.backend.base_url
            )));
        }
        if self.telemetry.enabled && !is_http_url(&self.telemetry.base_url) {
            return Err(ParleyError::Config(
                "telemetry.base_url must be set when telemetry is enabled".to_string(),
            ));
        }
        if self.chat.max_message_length == 0 {
            return Err(ParleyError::Config(
                "chat.max_message_length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// General client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// User identifier sent with every query.
    pub user_id: String,
    /// Department attached to document uploads.
    pub department: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            user_id: "anonymous".to_string(),
            department: "general".to_string(),
        }
    }
}

/// Query backend endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL every path below is appended to.
    pub base_url: String,
    /// General (streaming) query endpoint.
    pub query_path: String,
    /// Document-grounded query endpoint.
    pub document_query_path: String,
    /// Image analysis endpoint.
    pub image_query_path: String,
    /// Presigned upload handle endpoint.
    pub presign_path: String,
    /// Upload confirmation endpoint.
    pub confirm_path: String,
    /// Document listing / deletion endpoint.
    pub documents_path: String,
    /// Optional request timeout. Unset means the network stack decides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            query_path: "/query".to_string(),
            document_query_path: "/query_document".to_string(),
            image_query_path: "/process_image".to_string(),
            presign_path: "/getPresignedUrl".to_string(),
            confirm_path: "/confirmUpload".to_string(),
            documents_path: "/documents".to_string(),
            request_timeout_secs: None,
        }
    }
}

impl BackendConfig {
    /// Join the base URL with an endpoint path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Chat behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum message length in characters.
    pub max_message_length: usize,
    /// Custom system prompt forwarded with general queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    /// Prompt used when an image is sent without accompanying text.
    pub image_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 4000,
            custom_prompt: None,
            image_prompt: "Analyze this image".to_string(),
        }
    }
}

/// Interaction and session telemetry (PostgREST tables).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether interactions and sessions are recorded.
    pub enabled: bool,
    /// Project URL; tables live under `/rest/v1/`.
    pub base_url: String,
    /// Anonymous API key sent as `apikey` and bearer token.
    pub api_key: String,
    /// Table holding one row per interaction.
    pub interactions_table: String,
    /// Table holding one row per client session.
    pub sessions_table: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            interactions_table: "interactions".to_string(),
            sessions_table: "sessions".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ParleyConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.user_id, "anonymous");
        assert_eq!(config.backend.base_url, "http://localhost:5000/api");
        assert_eq!(config.backend.query_path, "/query");
        assert!(config.backend.request_timeout_secs.is_none());
        assert_eq!(config.chat.max_message_length, 4000);
        assert_eq!(config.chat.image_prompt, "Analyze this image");
        assert!(!config.telemetry.enabled);
        assert_eq!(config.telemetry.interactions_table, "interactions");
        assert_eq!(config.telemetry.sessions_table, "sessions");
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"
user_id = "user_42"
department = "hr"

[backend]
base_url = "https://api.example.com/production"
request_timeout_secs = 30

[chat]
max_message_length = 500
custom_prompt = "You are an HR policy assistant."

[telemetry]
enabled = true
base_url = "https://project.example.co"
api_key = "anon-key"
"#;
        let file = create_temp_config(content);
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.user_id, "user_42");
        assert_eq!(config.general.department, "hr");
        assert_eq!(config.backend.base_url, "https://api.example.com/production");
        assert_eq!(config.backend.request_timeout_secs, Some(30));
        // Unspecified paths keep their defaults
        assert_eq!(config.backend.query_path, "/query");
        assert_eq!(config.chat.max_message_length, 500);
        assert_eq!(
            config.chat.custom_prompt.as_deref(),
            Some("You are an HR policy assistant.")
        );
        assert!(config.telemetry.enabled);
        assert_eq!(config.telemetry.api_key, "anon-key");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.general.user_id, "anonymous");
        assert_eq!(config.backend.image_query_path, "/process_image");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = ParleyConfig::load(file.path());
        assert!(matches!(result, Err(ParleyError::Config(_))));
    }

    #[test]
    fn test_save_and_reload_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ParleyConfig::default();
        config.general.user_id = "saved-user".to_string();
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = ParleyConfig::load(&path).unwrap();
        assert_eq!(reloaded.general.user_id, "saved-user");
        assert_eq!(reloaded.backend.base_url, config.backend.base_url);
        assert!(reloaded.chat.custom_prompt.is_none());
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.general.department, "general");
        assert_eq!(config.backend.documents_path, "/documents");
    }

    #[test]
    fn test_backend_url_join() {
        let backend = BackendConfig {
            base_url: "http://localhost:5000/api/".to_string(),
            ..BackendConfig::default()
        };
        assert_eq!(backend.url("/query"), "http://localhost:5000/api/query");
        assert_eq!(backend.url("query"), "http://localhost:5000/api/query");
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = ParleyConfig::default();
        config.backend.base_url = "localhost:5000".to_string();
        assert!(matches!(config.validate(), Err(ParleyError::Config(_))));
    }

    #[test]
    fn test_validate_requires_telemetry_url_when_enabled() {
        let mut config = ParleyConfig::default();
        config.telemetry.enabled = true;
        assert!(config.validate().is_err());

        config.telemetry.base_url = "https://project.example.co".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_message_length() {
        let mut config = ParleyConfig::default();
        config.chat.max_message_length = 0;
        assert!(config.validate().is_err());
    }
}
