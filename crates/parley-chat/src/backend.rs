//! Query backends: the trait the orchestrator talks to, and its HTTP
//! implementation.
//!
//! The general endpoint may answer with an event stream or a single JSON
//! object; the document and image endpoints always answer with JSON.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use parley_core::config::BackendConfig;
use parley_core::QueryType;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ChatError;

/// Raw response body of a streaming query.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ChatError>> + Send>>;

/// Body of a general query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralQuery {
    pub question: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Body of a query grounded in an uploaded document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentQuery {
    pub question: String,
    pub user_id: String,
    pub document_id: String,
    pub document_name: String,
}

/// Body of an image analysis query. `image` is a `data:` URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageQuery {
    pub prompt: String,
    pub user_id: String,
    pub image: String,
}

/// Single-shot answer from any endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendReply {
    pub response: Option<String>,
    pub query_type: Option<QueryType>,
    pub context_summary: Option<String>,
    pub response_time: Option<f64>,
    pub tokens_used: Option<u64>,
    pub interaction_id: Option<String>,
    pub language: Option<String>,
}

impl BackendReply {
    /// Parse a reply object, unwrapping an API-gateway envelope if present.
    pub fn from_value(value: Value) -> Result<Self, ChatError> {
        let value = unwrap_envelope(value)?;
        let Value::Object(object) = value else {
            return Err(ChatError::MalformedResponse(
                "expected a JSON object".to_string(),
            ));
        };

        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

        if let (None, Some(error)) = (object.get("response"), text("error")) {
            return Err(ChatError::Upstream {
                status: None,
                message: error,
            });
        }

        Ok(Self {
            response: text("response"),
            query_type: object
                .get("query_type")
                .and_then(Value::as_str)
                .and_then(QueryType::parse),
            context_summary: text("context_summary"),
            response_time: object.get("response_time").and_then(Value::as_f64),
            tokens_used: object.get("tokens_used").and_then(Value::as_u64),
            interaction_id: object.get("interaction_id").and_then(scalar_to_string),
            language: text("language"),
        })
    }
}

/// Answer of the general endpoint.
pub enum QueryResponse {
    Stream(ByteStream),
    Complete(BackendReply),
}

impl std::fmt::Debug for QueryResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryResponse::Stream(_) => f.write_str("QueryResponse::Stream(..)"),
            QueryResponse::Complete(reply) => f.debug_tuple("QueryResponse::Complete").field(reply).finish(),
        }
    }
}

/// A query backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// General query; may stream.
    async fn query(&self, request: &GeneralQuery) -> Result<QueryResponse, ChatError>;

    async fn query_document(&self, request: &DocumentQuery) -> Result<BackendReply, ChatError>;

    async fn query_image(&self, request: &ImageQuery) -> Result<BackendReply, ChatError>;
}

/// [`ChatBackend`] over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Create a new backend client for `config`.
    pub fn new(config: BackendConfig) -> Result<Self, ChatError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {}", e)))?;
        info!(base_url = %config.base_url, "HTTP backend initialized");
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, ChatError> {
        let url = self.config.url(path);
        debug!(url = %url, "POST");
        let response = self.client.post(&url).json(body).send().await?;
        ensure_success(response).await
    }

    async fn single_shot<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<BackendReply, ChatError> {
        let response = self.post_json(path, body).await?;
        let value: Value = response.json().await?;
        BackendReply::from_value(value)
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn query(&self, request: &GeneralQuery) -> Result<QueryResponse, ChatError> {
        let response = self.post_json(&self.config.query_path, request).await?;

        if is_json(&response) {
            let value: Value = response.json().await?;
            return Ok(QueryResponse::Complete(BackendReply::from_value(value)?));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ChatError::from));
        Ok(QueryResponse::Stream(Box::pin(stream)))
    }

    async fn query_document(&self, request: &DocumentQuery) -> Result<BackendReply, ChatError> {
        self.single_shot(&self.config.document_query_path, request)
            .await
    }

    async fn query_image(&self, request: &ImageQuery) -> Result<BackendReply, ChatError> {
        self.single_shot(&self.config.image_query_path, request)
            .await
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false)
}

/// Turn a non-2xx response into [`ChatError::Upstream`].
pub(crate) async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "Upstream returned an error status");
    Err(ChatError::Upstream {
        status: Some(status.as_u16()),
        message: upstream_message(&body),
    })
}

/// Extract `detail` or `error` from an error body, or an empty string.
pub(crate) fn upstream_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return String::new();
    };
    let value = unwrap_envelope(value).unwrap_or(Value::Null);
    ["detail", "error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(scalar_to_string))
        .unwrap_or_default()
}

/// Unwrap `{"body": "<json string>"}` (or `{"body": {...}}`) gateway envelopes.
pub(crate) fn unwrap_envelope(value: Value) -> Result<Value, ChatError> {
    match value {
        Value::Object(mut object) if object.contains_key("body") && !object.contains_key("response") => {
            match object.remove("body") {
                Some(Value::String(inner)) => Ok(serde_json::from_str(&inner)?),
                Some(inner @ Value::Object(_)) | Some(inner @ Value::Array(_)) => Ok(inner),
                _ => Err(ChatError::MalformedResponse(
                    "envelope body is neither JSON text nor an object".to_string(),
                )),
            }
        }
        other => Ok(other),
    }
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ---- Request bodies ----

    #[test]
    fn test_general_query_body() {
        let body = serde_json::to_value(GeneralQuery {
            question: "What is the leave policy?".to_string(),
            user_id: "u1".to_string(),
            system_prompt: None,
        })
        .unwrap();
        assert_eq!(body, json!({"question": "What is the leave policy?", "userId": "u1"}));
    }

    #[test]
    fn test_general_query_body_with_prompt() {
        let body = serde_json::to_value(GeneralQuery {
            question: "q".to_string(),
            user_id: "u1".to_string(),
            system_prompt: Some("Be brief.".to_string()),
        })
        .unwrap();
        assert_eq!(body["systemPrompt"], "Be brief.");
    }

    #[test]
    fn test_document_and_image_bodies() {
        let body = serde_json::to_value(DocumentQuery {
            question: "q".to_string(),
            user_id: "u".to_string(),
            document_id: "d1".to_string(),
            document_name: "handbook.pdf".to_string(),
        })
        .unwrap();
        assert_eq!(body["documentId"], "d1");
        assert_eq!(body["documentName"], "handbook.pdf");

        let body = serde_json::to_value(ImageQuery {
            prompt: "Analyze this image".to_string(),
            user_id: "u".to_string(),
            image: "data:image/png;base64,AA==".to_string(),
        })
        .unwrap();
        assert_eq!(body["prompt"], "Analyze this image");
        assert_eq!(body["image"], "data:image/png;base64,AA==");
    }

    // ---- Reply parsing ----

    #[test]
    fn test_reply_full_object() {
        let reply = BackendReply::from_value(json!({
            "response": "**Yes**",
            "query_type": "document_query",
            "context_summary": "leave",
            "response_time": 0.75,
            "tokens_used": 120,
            "interaction_id": 9,
            "language": "en"
        }))
        .unwrap();
        assert_eq!(reply.response.as_deref(), Some("**Yes**"));
        assert_eq!(reply.query_type, Some(QueryType::Document));
        assert_eq!(reply.context_summary.as_deref(), Some("leave"));
        assert_eq!(reply.response_time, Some(0.75));
        assert_eq!(reply.tokens_used, Some(120));
        assert_eq!(reply.interaction_id.as_deref(), Some("9"));
        assert_eq!(reply.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_reply_gateway_envelope_string() {
        let reply = BackendReply::from_value(json!({
            "statusCode": 200,
            "body": "{\"response\": \"hi\", \"query_type\": \"general\"}"
        }))
        .unwrap();
        assert_eq!(reply.response.as_deref(), Some("hi"));
        assert_eq!(reply.query_type, Some(QueryType::General));
    }

    #[test]
    fn test_reply_gateway_envelope_object() {
        let reply = BackendReply::from_value(json!({"body": {"response": "hi"}})).unwrap();
        assert_eq!(reply.response.as_deref(), Some("hi"));
    }

    #[test]
    fn test_reply_bad_envelope() {
        let err = BackendReply::from_value(json!({"body": "not json"})).unwrap_err();
        assert!(matches!(err, ChatError::MalformedResponse(_)));
    }

    #[test]
    fn test_reply_missing_response_is_none() {
        let reply = BackendReply::from_value(json!({"query_type": "image"})).unwrap();
        assert!(reply.response.is_none());
    }

    #[test]
    fn test_reply_error_field_is_upstream() {
        let err = BackendReply::from_value(json!({"error": "No image provided"})).unwrap_err();
        assert!(matches!(err, ChatError::Upstream { ref message, .. } if message == "No image provided"));
    }

    #[test]
    fn test_reply_non_object() {
        let err = BackendReply::from_value(json!(["a"])).unwrap_err();
        assert!(matches!(err, ChatError::MalformedResponse(_)));
    }

    // ---- Error bodies ----

    #[test]
    fn test_upstream_message_prefers_detail() {
        assert_eq!(
            upstream_message(r#"{"detail": "question is required", "error": "x"}"#),
            "question is required"
        );
        assert_eq!(upstream_message(r#"{"error": "quota"}"#), "quota");
        assert_eq!(
            upstream_message(r#"{"body": "{\"detail\": \"wrapped\"}"}"#),
            "wrapped"
        );
    }

    #[test]
    fn test_upstream_message_unknown_body() {
        assert_eq!(upstream_message("<html>502</html>"), "");
        assert_eq!(upstream_message(r#"{"status": 500}"#), "");
    }
}
