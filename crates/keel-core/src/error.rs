//! Error types for keel-core

use thiserror::Error;

/// Result type alias using keel-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in keel-core operations
///
/// None of these escape the engine's public API; `fetch_with_fallback`
/// and friends recover locally and log instead (see `engine`).
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote client error
    #[error("Remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    /// HTTP client construction/transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
