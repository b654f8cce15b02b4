//! Submission API keys
//!
//! A key binds a caller to one model name. Submissions carrying a key may
//! only be recorded under that model.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRow {
    pub key: String,
    pub model: String,
    pub is_active: bool,
    pub expires_at: i64,
    pub created_at: i64,
}

pub fn insert_key(conn: &Connection, row: &ApiKeyRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO api_keys (key, model, is_active, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        params![row.key, row.model, row.is_active, row.expires_at, row.created_at],
    )?;
    Ok(())
}

/// Look up a key that is active and unexpired at `now`
pub fn resolve_key(conn: &Connection, key: &str, now: i64) -> Result<Option<ApiKeyRow>, StorageError> {
    conn.query_row(
        "SELECT key, model, is_active, expires_at, created_at FROM api_keys \
         WHERE key = ? AND is_active = 1 AND expires_at > ?",
        params![key, now],
        |row| {
            Ok(ApiKeyRow {
                key: row.get(0)?,
                model: row.get(1)?,
                is_active: row.get(2)?,
                expires_at: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn deactivate_key(conn: &Connection, key: &str) -> Result<bool, StorageError> {
    let changed = conn.execute("UPDATE api_keys SET is_active = 0 WHERE key = ?", params![key])?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BenchDb;

    fn key(key: &str, expires_at: i64) -> ApiKeyRow {
        ApiKeyRow {
            key: key.into(),
            model: "model-x".into(),
            is_active: true,
            expires_at,
            created_at: 0,
        }
    }

    #[test]
    fn test_resolve_only_active_unexpired() {
        let db = BenchDb::open_in_memory().unwrap();
        db.with_tx(|tx| {
            insert_key(tx, &key("pk_live", 1000))?;
            insert_key(tx, &key("pk_old", 10))?;
            insert_key(tx, &key("pk_off", 1000))?;
            deactivate_key(tx, "pk_off")?;
            Ok(())
        })
        .unwrap();

        let live = db.with_conn(|conn| resolve_key(conn, "pk_live", 500)).unwrap();
        assert_eq!(live.map(|k| k.model), Some("model-x".to_string()));
        assert!(db.with_conn(|conn| resolve_key(conn, "pk_old", 500)).unwrap().is_none());
        assert!(db.with_conn(|conn| resolve_key(conn, "pk_off", 500)).unwrap().is_none());
        assert!(db.with_conn(|conn| resolve_key(conn, "pk_missing", 500)).unwrap().is_none());
    }
}
