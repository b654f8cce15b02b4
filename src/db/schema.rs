//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| StorageError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| StorageError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| StorageError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(REFERENCE_SCHEMA)
        .map_err(|e| StorageError::Database(format!("Failed to create reference tables: {}", e)))?;

    conn.execute_batch(SUBMISSIONS_SCHEMA)
        .map_err(|e| StorageError::Database(format!("Failed to create submission tables: {}", e)))?;

    conn.execute_batch(AGGREGATES_SCHEMA)
        .map_err(|e| StorageError::Database(format!("Failed to create aggregate tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| StorageError::Database(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), StorageError> {
    info!("No migration steps registered from v{}", from_version);
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Reference table; immutable once seeded
const REFERENCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reference_entries (
    id INTEGER PRIMARY KEY NOT NULL CHECK (id >= 1),
    name TEXT NOT NULL,
    -- lowercase, trimmed name for case-insensitive lookup
    name_key TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    key TEXT PRIMARY KEY NOT NULL,
    model TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
"#;

/// Submissions and the vote ledger
const SUBMISSIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS submissions (
    id TEXT PRIMARY KEY NOT NULL,
    model TEXT NOT NULL,
    claimed_name TEXT NOT NULL,
    claimed_entity_id INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    media TEXT NOT NULL,

    -- Denormalized counters, maintained only by the counter maintainer
    upvotes_visual INTEGER NOT NULL DEFAULT 0 CHECK (upvotes_visual >= 0),
    downvotes_visual INTEGER NOT NULL DEFAULT 0 CHECK (downvotes_visual >= 0),
    upvotes_factual INTEGER NOT NULL DEFAULT 0 CHECK (upvotes_factual >= 0),
    downvotes_factual INTEGER NOT NULL DEFAULT 0 CHECK (downvotes_factual >= 0),

    is_flagged INTEGER NOT NULL DEFAULT 0,
    flag_reason TEXT,
    created_at INTEGER NOT NULL
);

-- Vote ledger. Several historical rows may exist per key; at most one is
-- inside the cooldown window because a recast inside it updates in place.
CREATE TABLE IF NOT EXISTS votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id TEXT NOT NULL,
    submission_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('visual', 'factual')),
    polarity TEXT NOT NULL CHECK (polarity IN ('up', 'down')),
    -- NULL for legacy rows; treated as expired until backfilled
    cast_at INTEGER,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (submission_id) REFERENCES submissions(id) ON DELETE CASCADE
);
"#;

/// Precomputed aggregates
const AGGREGATES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS platform_stats (
    id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
    total_submissions INTEGER NOT NULL DEFAULT 0 CHECK (total_submissions >= 0),
    total_votes INTEGER NOT NULL DEFAULT 0 CHECK (total_votes >= 0),
    total_flagged INTEGER NOT NULL DEFAULT 0 CHECK (total_flagged >= 0),
    unique_entities_covered INTEGER NOT NULL DEFAULT 0 CHECK (unique_entities_covered >= 0),
    total_entities INTEGER NOT NULL DEFAULT 0 CHECK (total_entities >= 0),
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS model_stats (
    model TEXT PRIMARY KEY NOT NULL,
    submission_count INTEGER NOT NULL DEFAULT 0 CHECK (submission_count >= 0),
    upvotes_visual_sum INTEGER NOT NULL DEFAULT 0 CHECK (upvotes_visual_sum >= 0),
    downvotes_visual_sum INTEGER NOT NULL DEFAULT 0 CHECK (downvotes_visual_sum >= 0),
    upvotes_factual_sum INTEGER NOT NULL DEFAULT 0 CHECK (upvotes_factual_sum >= 0),
    downvotes_factual_sum INTEGER NOT NULL DEFAULT 0 CHECK (downvotes_factual_sum >= 0),
    flagged_count INTEGER NOT NULL DEFAULT 0 CHECK (flagged_count >= 0),
    updated_at INTEGER NOT NULL
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_reference_name_key ON reference_entries(name_key);

CREATE INDEX IF NOT EXISTS idx_submissions_model ON submissions(model);
CREATE INDEX IF NOT EXISTS idx_submissions_entity ON submissions(claimed_entity_id);
CREATE INDEX IF NOT EXISTS idx_submissions_created_at ON submissions(created_at);
CREATE INDEX IF NOT EXISTS idx_submissions_upvotes_visual ON submissions(upvotes_visual);
CREATE INDEX IF NOT EXISTS idx_submissions_flagged ON submissions(is_flagged);
CREATE INDEX IF NOT EXISTS idx_submissions_model_entity ON submissions(model, claimed_entity_id);

-- Most-recent lookup per ledger key
CREATE INDEX IF NOT EXISTS idx_votes_key ON votes(client_id, submission_id, kind, cast_at);
CREATE INDEX IF NOT EXISTS idx_votes_cast_at ON votes(cast_at);
CREATE INDEX IF NOT EXISTS idx_votes_submission ON votes(submission_id);

CREATE INDEX IF NOT EXISTS idx_api_keys_model ON api_keys(model);
"#;
