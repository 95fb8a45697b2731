use thiserror::Error;

/// Errors from loading analytics rows.
#[derive(Error, Debug)]
pub enum InsightError {
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("malformed rows: {0}")]
    Malformed(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for InsightError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            InsightError::Malformed(err.to_string())
        } else {
            InsightError::Fetch(err.to_string())
        }
    }
}

impl From<serde_json::Error> for InsightError {
    fn from(err: serde_json::Error) -> Self {
        InsightError::Malformed(err.to_string())
    }
}
