//! Error types for tether-core

use thiserror::Error;

/// Result type alias using tether-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tether-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or queue item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local storage unavailable or corrupted
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote service failure surfaced through a public API call
    #[error("Remote service error: {0}")]
    Remote(String),
}

impl From<crate::remote::RemoteError> for Error {
    fn from(err: crate::remote::RemoteError) -> Self {
        Self::Remote(err.to_string())
    }
}
