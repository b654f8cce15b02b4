//! Reference table operations
//!
//! Static (id, canonical name) pairs used to validate submissions. Rows are
//! bulk-inserted by the seeding job and never updated afterwards.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;

/// Reference row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub id: i64,
    pub name: String,
}

impl ReferenceEntry {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
        })
    }
}

/// Key used for case- and whitespace-insensitive name comparison
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Result of a seeding batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub inserted: u64,
    pub skipped: u64,
}

/// Get an entry by id
pub fn get_entry(conn: &Connection, id: i64) -> Result<Option<ReferenceEntry>, StorageError> {
    conn.query_row(
        "SELECT id, name FROM reference_entries WHERE id = ?",
        params![id],
        |row| ReferenceEntry::from_row(row),
    )
    .optional()
    .map_err(StorageError::from)
}

/// Find an entry by name, ignoring case and surrounding whitespace
pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<ReferenceEntry>, StorageError> {
    conn.query_row(
        "SELECT id, name FROM reference_entries WHERE name_key = ? ORDER BY id LIMIT 1",
        params![name_key(name)],
        |row| ReferenceEntry::from_row(row),
    )
    .optional()
    .map_err(StorageError::from)
}

/// Insert entries whose id is not yet present; existing ids are left untouched
pub fn seed_if_absent(conn: &Connection, entries: &[ReferenceEntry]) -> Result<SeedResult, StorageError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO reference_entries (id, name, name_key) VALUES (?, ?, ?)",
    )?;

    let mut result = SeedResult::default();
    for entry in entries {
        if entry.id < 1 {
            return Err(StorageError::Validation(format!(
                "reference id must be >= 1, got {}",
                entry.id
            )));
        }
        if entry.name.trim().is_empty() {
            return Err(StorageError::Validation(format!(
                "reference name for id {} is empty",
                entry.id
            )));
        }

        let changed = stmt.execute(params![entry.id, entry.name.trim(), name_key(&entry.name)])?;
        if changed > 0 {
            result.inserted += 1;
        } else {
            result.skipped += 1;
        }
    }

    debug!(inserted = result.inserted, skipped = result.skipped, "Seeded reference entries");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BenchDb;

    #[test]
    fn test_seed_if_absent_skips_existing_ids() {
        let db = BenchDb::open_in_memory().unwrap();

        let first = db
            .with_tx(|tx| {
                seed_if_absent(tx, &[ReferenceEntry::new(1, "Alpha"), ReferenceEntry::new(2, "Beta")])
            })
            .unwrap();
        assert_eq!(first, SeedResult { inserted: 2, skipped: 0 });

        let second = db
            .with_tx(|tx| {
                seed_if_absent(tx, &[ReferenceEntry::new(2, "Renamed"), ReferenceEntry::new(3, "Gamma")])
            })
            .unwrap();
        assert_eq!(second, SeedResult { inserted: 1, skipped: 1 });

        let beta = db.with_conn(|conn| get_entry(conn, 2)).unwrap().unwrap();
        assert_eq!(beta.name, "Beta");
        assert_eq!(db.stats().unwrap().reference_entries, 3);
    }

    #[test]
    fn test_find_by_name_is_case_insensitive() {
        let db = BenchDb::open_in_memory().unwrap();
        db.with_tx(|tx| seed_if_absent(tx, &[ReferenceEntry::new(7, "Example")]))
            .unwrap();

        let found = db.with_conn(|conn| find_by_name(conn, "  EXAMPLE ")).unwrap();
        assert_eq!(found.map(|e| e.id), Some(7));
        assert!(db.with_conn(|conn| find_by_name(conn, "other")).unwrap().is_none());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let db = BenchDb::open_in_memory().unwrap();
        let err = db
            .with_tx(|tx| seed_if_absent(tx, &[ReferenceEntry::new(0, "Zero")]))
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }
}
