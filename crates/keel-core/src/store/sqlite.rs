//! libSQL-backed implementation of the local record store

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{params, Builder, Connection, Database};
use serde_json::{Map, Value};

use super::migrations;
use super::LocalStore;
use crate::error::Result;
use crate::record::Record;

/// Durable record store on a local `SQLite` file.
///
/// All rows live in one `records` table keyed `(table_name, user_id, id)`,
/// so writers to different tables only contend on `SQLite`'s own locking.
pub struct SqliteStore {
    _db: Database,
    conn: Connection,
}

impl SqliteStore {
    /// Open a store at the given path, creating it if it doesn't exist.
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let store = Self { _db: db, conn };
        store.configure().await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let store = Self { _db: db, conn };
        store.configure().await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok(); // No WAL for in-memory databases
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    fn parse_record(
        id: String,
        user_id: String,
        synced: bool,
        fields_json: &str,
    ) -> Result<Record> {
        let fields: Map<String, Value> = serde_json::from_str(fields_json)?;
        let mut record = Record::new(id, user_id, fields);
        record.synced = synced;
        Ok(record)
    }

    /// Delete then re-insert one `(table, user)` slice. Caller owns the
    /// surrounding transaction.
    async fn replace_slice(&self, table: &str, user_id: &str, records: &[Record]) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM records WHERE table_name = ? AND user_id = ?",
                params![table, user_id],
            )
            .await?;
        for record in records {
            self.insert_row(table, user_id, record).await?;
        }
        Ok(())
    }

    async fn insert_row(&self, table: &str, user_id: &str, record: &Record) -> Result<()> {
        let fields_json = serde_json::to_string(&record.fields)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO records (table_name, user_id, id, fields, synced, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    table,
                    user_id,
                    record.id.as_str(),
                    fields_json,
                    i64::from(record.synced),
                    Utc::now().timestamp_millis(),
                ],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn load(&self, table: &str, user_id: &str) -> Result<Vec<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, synced, fields FROM records
                 WHERE table_name = ? AND user_id = ?
                 ORDER BY updated_at, id",
                params![table, user_id],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let owner: String = row.get(1)?;
            let synced: i32 = row.get(2)?;
            let fields_json: String = row.get(3)?;
            records.push(Self::parse_record(id, owner, synced != 0, &fields_json)?);
        }
        Ok(records)
    }

    async fn save(&self, table: &str, user_id: &str, records: &[Record]) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        if let Err(e) = self.replace_slice(table, user_id, records).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e);
        }
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(())
    }

    async fn append(&self, table: &str, user_id: &str, record: &Record) -> Result<()> {
        self.insert_row(table, user_id, record).await
    }

    async fn remove(&self, table: &str, user_id: &str, id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM records WHERE table_name = ? AND user_id = ? AND id = ?",
                params![table, user_id, id],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str, user: &str, title: &str) -> Record {
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!(title));
        Record::new(id, user, fields)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_empty_table_returns_no_records() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let records = store.load("tasks", "u1").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn append_then_load_round_trips() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut rec = record("r1", "u1", "Buy milk");
        rec.synced = true;

        store.append("tasks", "u1", &rec).await.unwrap();
        let loaded = store.load("tasks", "u1").await.unwrap();

        assert_eq!(loaded, vec![rec]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn append_replaces_by_id() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .append("tasks", "u1", &record("r1", "u1", "Buy milk"))
            .await
            .unwrap();
        store
            .append("tasks", "u1", &record("r1", "u1", "Buy oat milk"))
            .await
            .unwrap();

        let loaded = store.load("tasks", "u1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].fields.get("title"), Some(&json!("Buy oat milk")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_replaces_the_whole_slice() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .append("tasks", "u1", &record("old", "u1", "Stale"))
            .await
            .unwrap();

        let fresh = vec![record("r1", "u1", "A"), record("r2", "u1", "B")];
        store.save("tasks", "u1", &fresh).await.unwrap();

        let loaded = store.load("tasks", "u1").await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_deletes_by_id() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .append("tasks", "u1", &record("r1", "u1", "A"))
            .await
            .unwrap();
        store.remove("tasks", "u1", "r1").await.unwrap();

        assert!(store.load("tasks", "u1").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scopes_are_isolated_by_table_and_user() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .append("tasks", "u1", &record("r1", "u1", "A"))
            .await
            .unwrap();
        store
            .append("habits", "u1", &record("r1", "u1", "B"))
            .await
            .unwrap();
        store
            .append("tasks", "u2", &record("r1", "u2", "C"))
            .await
            .unwrap();

        store.save("tasks", "u1", &[]).await.unwrap();

        assert!(store.load("tasks", "u1").await.unwrap().is_empty());
        assert_eq!(store.load("habits", "u1").await.unwrap().len(), 1);
        assert_eq!(store.load("tasks", "u2").await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .append("tasks", "u1", &record("r1", "u1", "Durable"))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let loaded = store.load("tasks", "u1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[0].synced);
    }
}
