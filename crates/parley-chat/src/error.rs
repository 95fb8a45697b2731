//! Error types for the chat client.

use parley_core::error::ParleyError;

use crate::conversation::SubmissionState;

/// Generic message shown when nothing more specific is known.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

/// Errors from the chat engine and its backends.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("missing attachment: {0}")]
    MissingAttachment(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("upstream error{}: {}", status_suffix(.status), .message)]
    Upstream { status: Option<u16>, message: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("a submission is already in flight")]
    SubmissionInFlight,
    #[error("invalid submission transition: {0:?} -> {1:?}")]
    InvalidTransition(SubmissionState, SubmissionState),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl ChatError {
    /// Text shown to the user in place of (or after) the assistant response.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::EmptyMessage => "Please enter a message.".to_string(),
            ChatError::MessageTooLong(max) => {
                format!("Your message is too long (maximum {} characters).", max)
            }
            ChatError::MissingAttachment(what) => format!("Please select {}.", what),
            ChatError::Transport(_) => {
                "No response received from the server. Please check your internet connection."
                    .to_string()
            }
            ChatError::Upstream { message, .. } if !message.trim().is_empty() => {
                format!("Error: {}", message.trim())
            }
            ChatError::Cancelled => "Request cancelled.".to_string(),
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    /// Whether the error comes from local validation rather than a backend.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) | ChatError::MissingAttachment(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChatError::MalformedResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ChatError::Upstream {
                status: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else {
            ChatError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::MalformedResponse(err.to_string())
    }
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        ChatError::Config(err.to_string())
    }
}
