//! Backend selection by attachment.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parley_core::QueryType;
use serde::{Deserialize, Serialize};

/// A document accepted by the upload handshake, queried by later turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContext {
    pub document_id: String,
    pub name: String,
}

/// What is attached to the next submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachments {
    /// Image as a `data:` URL; consumed by the next submission.
    pub image: Option<String>,
    /// Accepted document; persists until a new chat.
    pub document: Option<DocumentContext>,
}

impl Attachments {
    pub fn clear(&mut self) {
        self.image = None;
        self.document = None;
    }
}

/// Which backend a submission goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Image,
    Document,
    General,
}

impl Route {
    pub fn query_type(&self) -> QueryType {
        match self {
            Route::Image => QueryType::Image,
            Route::Document => QueryType::Document,
            Route::General => QueryType::General,
        }
    }
}

/// Image beats document beats general.
pub fn select_route(attachments: &Attachments) -> Route {
    if attachments.image.is_some() {
        Route::Image
    } else if attachments.document.is_some() {
        Route::Document
    } else {
        Route::General
    }
}

/// Encode raw image bytes as a `data:` URL.
pub fn image_data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Guess an image MIME type from a file extension.
pub fn image_mime_for(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
