//! Local store layer for Keel
//!
//! Durable per-table, per-user record lists. The store is the only
//! component that survives process restarts and total network loss.

mod migrations;
mod sqlite;

use async_trait::async_trait;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::record::Record;

/// Trait for local record storage, keyed by `(table, user_id)`.
///
/// Implementations report failures as typed errors; deciding whether a
/// failure may reach the caller is the engine's job, not the store's.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Load all records for a table+user. Empty if none persisted yet.
    async fn load(&self, table: &str, user_id: &str) -> Result<Vec<Record>>;

    /// Replace the entire persisted set for a table+user.
    async fn save(&self, table: &str, user_id: &str, records: &[Record]) -> Result<()>;

    /// Add or replace-by-id a single record.
    async fn append(&self, table: &str, user_id: &str, record: &Record) -> Result<()>;

    /// Delete a record by id.
    async fn remove(&self, table: &str, user_id: &str, id: &str) -> Result<()>;
}
