//! SQLite store for the benchmark
//!
//! One database file holds the reference table, submissions, the vote
//! ledger and the precomputed aggregates. Every externally triggered write
//! runs as a single `IMMEDIATE` transaction through [`BenchDb::with_tx`], so
//! ledger lookups, counter updates and aggregate updates commit or roll back
//! together.
//!
//! ## Tables
//!
//! - `reference_entries` - valid (id, canonical name) pairs
//! - `submissions` - model guesses with denormalized vote counters
//! - `votes` - the vote ledger, one row per active (client, submission, kind)
//! - `platform_stats` - singleton platform aggregate
//! - `model_stats` - per-model aggregate, unique by model
//! - `api_keys` - submission credentials bound to a model

pub mod schema;
pub mod reference;
pub mod submissions;
pub mod votes;
pub mod stats;
pub mod api_keys;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::StorageError;

/// Current UTC time in milliseconds since the epoch
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite database for the benchmark
pub struct BenchDb {
    conn: Mutex<Connection>,
}

impl BenchDb {
    /// Open or create the database inside `storage_dir`
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL for concurrent snapshot reads alongside the single writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StorageError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| StorageError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Run a read-only query against a consistent view
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one write transaction; any error rolls everything back
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StorageError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Database(format!("Transaction failed: {}", e)))?;

        // Dropping an uncommitted transaction rolls it back
        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| StorageError::Database(format!("Commit failed: {}", e)))?;
        Ok(value)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, StorageError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                reference_entries: count("SELECT COUNT(*) FROM reference_entries")?,
                submissions: count("SELECT COUNT(*) FROM submissions")?,
                ledger_rows: count("SELECT COUNT(*) FROM votes")?,
                models: count("SELECT COUNT(*) FROM model_stats")?,
            })
        })
    }
}

/// Row counts for health reporting
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub reference_entries: u64,
    pub submissions: u64,
    pub ledger_rows: u64,
    pub models: u64,
}

// Re-exports
pub use reference::{ReferenceEntry, SeedResult};
pub use submissions::{NewSubmission, SortBy, SubmissionQuery, SubmissionRow};
pub use stats::{ModelAggregate, PlatformAggregate};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = BenchDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.submissions, 0);
        assert_eq!(stats.ledger_rows, 0);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = BenchDb::open_in_memory().unwrap();

        let result: Result<(), StorageError> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO reference_entries (id, name, name_key) VALUES (1, 'Example', 'example')",
                [],
            )?;
            Err(StorageError::Internal("abort".into()))
        });
        assert!(result.is_err());

        assert_eq!(db.stats().unwrap().reference_entries, 0);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.db");

        {
            let db = BenchDb::open(&path).unwrap();
            db.with_tx(|tx| {
                reference::seed_if_absent(tx, &[ReferenceEntry::new(1, "Example")])
            })
            .unwrap();
        }

        let db = BenchDb::open(&path).unwrap();
        assert_eq!(db.stats().unwrap().reference_entries, 1);
    }
}
