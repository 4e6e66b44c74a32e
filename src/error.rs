//! Error types for the moderation service.
//!
//! All errors are explicitly typed using thiserror. Moderation outcomes
//! (warn/block) are never errors; these variants cover operational and
//! validation failures only.

use thiserror::Error;

/// Central error type for all Chaperone operations.
#[derive(Debug, Error)]
pub enum ChaperoneError {
    /// The classification API returned an error or unexpected response.
    #[error("classifier error: {0}")]
    ClassifierApi(String),

    /// Rate limited by the classification API.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds to wait before retry.
        retry_after_ms: u64,
    },

    /// Configuration error (missing env vars, invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Request failed input validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A reporter already reported this message.
    #[error("message already reported by this user")]
    DuplicateReport,

    /// Regex pattern compilation error.
    #[error("regex pattern error: {0}")]
    RegexPattern(#[from] regex::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl ChaperoneError {
    /// User-facing error message that hides internal details.
    pub fn user_message(&self) -> String {
        match self {
            Self::ClassifierApi(_) | Self::Http(_) => {
                "Moderation service temporarily unavailable".to_string()
            }
            Self::RateLimited { .. } => "Too many requests, please try again later".to_string(),
            Self::Config(_) => "Service configuration error".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(what) => format!("{} not found", what),
            Self::DuplicateReport => "You have already reported this message".to_string(),
            Self::RegexPattern(_) => "Invalid pattern configuration".to_string(),
            Self::Json(_) => "Data format error".to_string(),
            Self::Database(_) => "Storage service temporarily unavailable".to_string(),
        }
    }
}

/// Result type alias for Chaperone operations.
pub type Result<T> = std::result::Result<T, ChaperoneError>;
