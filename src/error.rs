// src/error.rs
// Standardized error types for kiro-recall

use thiserror::Error;

/// Main error type for the kiro-recall library
#[derive(Error, Debug)]
pub enum RecallError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache serialization error: {0}")]
    Cache(#[from] postcard::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),
}

/// Convenience type alias for Result using RecallError
pub type Result<T> = std::result::Result<T, RecallError>;

impl RecallError {
    /// Convert to user-facing string for MCP tool boundaries
    pub fn to_user_string(&self) -> String {
        self.to_string()
    }
}

impl From<String> for RecallError {
    fn from(s: String) -> Self {
        RecallError::Other(s)
    }
}

impl From<RecallError> for String {
    fn from(err: RecallError) -> Self {
        err.to_string()
    }
}
