//! Remote client layer for Keel
//!
//! A thin interface to the authoritative backend: row-level CRUD keyed
//! by user identity. No retry or caching lives here; all resilience is
//! the sync engine's job.

mod http;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use http::{HttpRemoteClient, RemoteConfig};

use crate::filter::Filter;
use crate::record::Record;

/// Errors from the remote client
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Invalid client configuration
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),

    /// Transport-level failure (unreachable, timeout, TLS)
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend rejected the request
    #[error("Remote API error: {0}")]
    Api(String),

    /// Response body did not match the row contract
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Row-level CRUD against the authoritative backend.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Query a table's rows for one user, optionally filtered.
    async fn select(
        &self,
        table: &str,
        user_id: &str,
        filter: Option<&Filter>,
    ) -> RemoteResult<Vec<Record>>;

    /// Insert a row; the backend assigns the id and returns the row.
    async fn insert(
        &self,
        table: &str,
        user_id: &str,
        fields: &Map<String, Value>,
    ) -> RemoteResult<Record>;

    /// Update a row's fields by id.
    async fn update(&self, table: &str, id: &str, fields: &Map<String, Value>) -> RemoteResult<()>;

    /// Delete a row by id.
    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()>;

    /// Insert-or-update a full row by its id.
    async fn upsert(&self, table: &str, record: &Record) -> RemoteResult<()>;
}
