// crates/apprentice-server/src/error.rs
// Standardized error types for Apprentice

use thiserror::Error;

/// Main error type for the Apprentice library
#[derive(Error, Debug)]
pub enum ApprenticeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using ApprenticeError
pub type Result<T> = std::result::Result<T, ApprenticeError>;

impl From<String> for ApprenticeError {
    fn from(s: String) -> Self {
        ApprenticeError::Other(s)
    }
}

impl From<tokio::task::JoinError> for ApprenticeError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ApprenticeError::Cancelled
        } else {
            ApprenticeError::Other(err.to_string())
        }
    }
}

impl From<ApprenticeError> for String {
    fn from(err: ApprenticeError) -> Self {
        err.to_string()
    }
}
