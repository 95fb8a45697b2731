//! Document upload handshake and document administration.
//!
//! Upload is three steps: request a presigned handle, PUT the bytes to it,
//! then confirm so the backend starts processing the document.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{ensure_success, unwrap_envelope, HttpBackend};
use crate::error::ChatError;
use crate::router::DocumentContext;

/// A file to upload.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentUpload {
    /// Read a file from disk, guessing its content type from the extension.
    pub async fn from_path(path: &std::path::Path) -> Result<Self, ChatError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ChatError::MissingAttachment(format!("{} ({})", path.display(), e)))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        Ok(Self {
            content_type: content_type_for(&file_name).to_string(),
            file_name,
            bytes,
        })
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresignRequest<'a> {
    file_name: &'a str,
    file_type: &'a str,
    department: &'a str,
}

/// Presigned upload handle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadHandle {
    pub upload_url: String,
    pub file_key: String,
    pub document_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest<'a> {
    file_key: &'a str,
    document_id: &'a str,
    department: &'a str,
}

/// One entry of the document listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentSummary {
    #[serde(alias = "documentId", alias = "id")]
    pub document_id: String,
    #[serde(default, alias = "fileName", alias = "name")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default, alias = "uploadedAt", alias = "created_at")]
    pub uploaded_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Document storage reached through the query backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run the upload handshake; on success the document can be queried.
    async fn upload(
        &self,
        upload: &DocumentUpload,
        department: &str,
    ) -> Result<DocumentContext, ChatError>;

    async fn list(&self) -> Result<Vec<DocumentSummary>, ChatError>;

    async fn delete(&self, document_id: &str) -> Result<(), ChatError>;
}

fn validate_upload(upload: &DocumentUpload, department: &str) -> Result<(), ChatError> {
    if upload.file_name.trim().is_empty() || upload.bytes.is_empty() {
        return Err(ChatError::MissingAttachment("a file".to_string()));
    }
    if department.trim().is_empty() {
        return Err(ChatError::MissingAttachment("a department".to_string()));
    }
    Ok(())
}

/// Parse a listing body: a bare array, `{"documents": [...]}`, or either
/// inside a gateway envelope.
pub(crate) fn parse_document_list(value: Value) -> Result<Vec<DocumentSummary>, ChatError> {
    let value = unwrap_envelope(value)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("documents") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ChatError::MalformedResponse(
                    "document listing has no documents array".to_string(),
                ))
            }
        },
        _ => {
            return Err(ChatError::MalformedResponse(
                "document listing is not an array".to_string(),
            ))
        }
    };
    Ok(serde_json::from_value(Value::Array(items))?)
}

#[async_trait]
impl DocumentStore for HttpBackend {
    async fn upload(
        &self,
        upload: &DocumentUpload,
        department: &str,
    ) -> Result<DocumentContext, ChatError> {
        validate_upload(upload, department)?;

        let presign = PresignRequest {
            file_name: &upload.file_name,
            file_type: &upload.content_type,
            department,
        };
        let response = self.post_json(&self.config().presign_path, &presign).await?;
        let handle: UploadHandle =
            serde_json::from_value(unwrap_envelope(response.json().await?)?)?;
        debug!(document_id = %handle.document_id, file_key = %handle.file_key, "Upload handle issued");

        let response = self
            .client()
            .put(&handle.upload_url)
            .header(CONTENT_TYPE, &upload.content_type)
            .body(upload.bytes.clone())
            .send()
            .await?;
        ensure_success(response).await?;

        let confirm = ConfirmRequest {
            file_key: &handle.file_key,
            document_id: &handle.document_id,
            department,
        };
        self.post_json(&self.config().confirm_path, &confirm)
            .await?;

        info!(
            document_id = %handle.document_id,
            file_name = %upload.file_name,
            bytes = upload.bytes.len(),
            "Document uploaded"
        );
        Ok(DocumentContext {
            document_id: handle.document_id,
            name: upload.file_name.clone(),
        })
    }

    async fn list(&self) -> Result<Vec<DocumentSummary>, ChatError> {
        let url = self.config().url(&self.config().documents_path);
        let response = ensure_success(self.client().get(&url).send().await?).await?;
        parse_document_list(response.json().await?)
    }

    async fn delete(&self, document_id: &str) -> Result<(), ChatError> {
        let url = format!(
            "{}/{}",
            self.config().url(&self.config().documents_path),
            document_id
        );
        ensure_success(self.client().delete(&url).send().await?).await?;
        info!(document_id, "Document deleted");
        Ok(())
    }
}
