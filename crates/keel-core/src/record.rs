//! Record model shared by the local store, remote client, and sync engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Prefix for client-assigned temporary ids. Remote-assigned ids never
/// carry it, so the two namespaces cannot collide.
const TEMP_ID_PREFIX: &str = "temp_";

/// Field names owned by the sync layer, not by callers.
const RESERVED_FIELDS: [&str; 3] = ["id", "user_id", "synced"];

/// One row of app data: sync metadata plus a soft-typed payload.
///
/// The engine never interprets payload fields; tables stay schema-free.
/// Serializes to a flat JSON object (`id`, `user_id`, `synced`, then the
/// payload), which is also the remote row shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique within a table+user scope
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Whether the remote store has acknowledged the current field values
    #[serde(default)]
    pub synced: bool,
    /// Soft-typed payload fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with an explicit id.
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            synced: false,
            fields: strip_reserved(fields),
        }
    }

    /// Create an unsynced record under a fresh temporary id.
    pub fn with_temp_id(user_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self::new(temp_id(), user_id, fields)
    }

    /// Whether this record still carries a client-assigned temporary id.
    pub fn is_temp(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// Merge field changes into the payload.
    ///
    /// Reserved keys (`id`, `user_id`, `synced`) are ignored; sync
    /// metadata is owned by the engine.
    pub fn merge_fields(&mut self, changes: &Map<String, Value>) {
        for (key, value) in changes {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// The full row as sent to the remote store: id, owner, and payload,
    /// with the local `synced` flag stripped.
    pub fn remote_row(&self) -> Map<String, Value> {
        let mut row = self.fields.clone();
        row.insert("id".to_string(), Value::String(self.id.clone()));
        row.insert("user_id".to_string(), Value::String(self.user_id.clone()));
        row
    }
}

/// Generate a temporary id: namespaced prefix plus a UUIDv7
/// (timestamp + random), so offline inserts sort by creation time and
/// cannot collide with remote-assigned ids.
pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7())
}

fn strip_reserved(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_FIELDS {
        fields.remove(key);
    }
    fields
}
