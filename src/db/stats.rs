//! Aggregate row storage
//!
//! The platform row is a singleton (`id = 1`); model rows are keyed by model
//! name. Both are created on first touch.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::StorageError;

/// Platform-wide counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformAggregate {
    pub total_submissions: i64,
    pub total_votes: i64,
    pub total_flagged: i64,
    pub unique_entities_covered: i64,
    pub total_entities: i64,
}

impl PlatformAggregate {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            total_submissions: row.get("total_submissions")?,
            total_votes: row.get("total_votes")?,
            total_flagged: row.get("total_flagged")?,
            unique_entities_covered: row.get("unique_entities_covered")?,
            total_entities: row.get("total_entities")?,
        })
    }
}

/// Per-model sums
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAggregate {
    pub model: String,
    pub submission_count: i64,
    pub upvotes_visual_sum: i64,
    pub downvotes_visual_sum: i64,
    pub upvotes_factual_sum: i64,
    pub downvotes_factual_sum: i64,
    pub flagged_count: i64,
}

impl ModelAggregate {
    pub fn empty(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Default::default() }
    }

    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            model: row.get("model")?,
            submission_count: row.get("submission_count")?,
            upvotes_visual_sum: row.get("upvotes_visual_sum")?,
            downvotes_visual_sum: row.get("downvotes_visual_sum")?,
            upvotes_factual_sum: row.get("upvotes_factual_sum")?,
            downvotes_factual_sum: row.get("downvotes_factual_sum")?,
            flagged_count: row.get("flagged_count")?,
        })
    }
}

const PLATFORM_COLUMNS: &str =
    "total_submissions, total_votes, total_flagged, unique_entities_covered, total_entities";

const MODEL_COLUMNS: &str = "model, submission_count, upvotes_visual_sum, downvotes_visual_sum, \
     upvotes_factual_sum, downvotes_factual_sum, flagged_count";

pub fn load_platform(conn: &Connection) -> Result<Option<PlatformAggregate>, StorageError> {
    let sql = format!("SELECT {} FROM platform_stats WHERE id = 1", PLATFORM_COLUMNS);
    conn.query_row(&sql, [], |row| PlatformAggregate::from_row(row))
        .optional()
        .map_err(StorageError::from)
}

/// Read the platform row, creating a zeroed one if absent
pub fn get_or_create_platform(conn: &Connection, now: i64) -> Result<PlatformAggregate, StorageError> {
    conn.execute(
        "INSERT OR IGNORE INTO platform_stats (id, updated_at) VALUES (1, ?)",
        params![now],
    )?;
    load_platform(conn)?
        .ok_or_else(|| StorageError::Internal("platform_stats row missing after insert".into()))
}

pub fn write_platform(conn: &Connection, agg: &PlatformAggregate, now: i64) -> Result<(), StorageError> {
    conn.execute(
        r#"
        INSERT INTO platform_stats (
            id, total_submissions, total_votes, total_flagged,
            unique_entities_covered, total_entities, updated_at
        ) VALUES (1, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            total_submissions = excluded.total_submissions,
            total_votes = excluded.total_votes,
            total_flagged = excluded.total_flagged,
            unique_entities_covered = excluded.unique_entities_covered,
            total_entities = excluded.total_entities,
            updated_at = excluded.updated_at
        "#,
        params![
            agg.total_submissions,
            agg.total_votes,
            agg.total_flagged,
            agg.unique_entities_covered,
            agg.total_entities,
            now,
        ],
    )?;
    Ok(())
}

pub fn load_model(conn: &Connection, model: &str) -> Result<Option<ModelAggregate>, StorageError> {
    let sql = format!("SELECT {} FROM model_stats WHERE model = ?", MODEL_COLUMNS);
    conn.query_row(&sql, params![model], |row| ModelAggregate::from_row(row))
        .optional()
        .map_err(StorageError::from)
}

/// Read a model row, creating a zeroed one if absent
pub fn get_or_create_model(conn: &Connection, model: &str, now: i64) -> Result<ModelAggregate, StorageError> {
    conn.execute(
        "INSERT OR IGNORE INTO model_stats (model, updated_at) VALUES (?, ?)",
        params![model, now],
    )?;
    load_model(conn, model)?
        .ok_or_else(|| StorageError::Internal(format!("model_stats row for {} missing after insert", model)))
}

pub fn write_model(conn: &Connection, agg: &ModelAggregate, now: i64) -> Result<(), StorageError> {
    conn.execute(
        r#"
        INSERT INTO model_stats (
            model, submission_count, upvotes_visual_sum, downvotes_visual_sum,
            upvotes_factual_sum, downvotes_factual_sum, flagged_count, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(model) DO UPDATE SET
            submission_count = excluded.submission_count,
            upvotes_visual_sum = excluded.upvotes_visual_sum,
            downvotes_visual_sum = excluded.downvotes_visual_sum,
            upvotes_factual_sum = excluded.upvotes_factual_sum,
            downvotes_factual_sum = excluded.downvotes_factual_sum,
            flagged_count = excluded.flagged_count,
            updated_at = excluded.updated_at
        "#,
        params![
            agg.model,
            agg.submission_count,
            agg.upvotes_visual_sum,
            agg.downvotes_visual_sum,
            agg.upvotes_factual_sum,
            agg.downvotes_factual_sum,
            agg.flagged_count,
            now,
        ],
    )?;
    Ok(())
}

/// All model rows, ordered by model name
pub fn list_models(conn: &Connection) -> Result<Vec<ModelAggregate>, StorageError> {
    let sql = format!("SELECT {} FROM model_stats ORDER BY model", MODEL_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| ModelAggregate::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_all_models(conn: &Connection) -> Result<usize, StorageError> {
    Ok(conn.execute("DELETE FROM model_stats", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BenchDb;

    #[test]
    fn test_platform_singleton_read_or_create() {
        let db = BenchDb::open_in_memory().unwrap();
        assert!(db.with_conn(load_platform).unwrap().is_none());

        let created = db.with_tx(|tx| get_or_create_platform(tx, 1)).unwrap();
        assert_eq!(created, PlatformAggregate::default());

        let updated = PlatformAggregate { total_submissions: 3, total_votes: 5, ..Default::default() };
        db.with_tx(|tx| write_platform(tx, &updated, 2)).unwrap();

        // A second create must not reset the row
        let again = db.with_tx(|tx| get_or_create_platform(tx, 3)).unwrap();
        assert_eq!(again, updated);

        let rows: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM platform_stats", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_model_rows_unique_by_model() {
        let db = BenchDb::open_in_memory().unwrap();
        db.with_tx(|tx| {
            let mut agg = get_or_create_model(tx, "zeta", 1)?;
            agg.submission_count = 2;
            write_model(tx, &agg, 1)?;
            get_or_create_model(tx, "zeta", 2)?;
            get_or_create_model(tx, "alpha", 2)?;
            Ok(())
        })
        .unwrap();

        let models = db.with_conn(list_models).unwrap();
        assert_eq!(models.iter().map(|m| m.model.as_str()).collect::<Vec<_>>(), vec!["alpha", "zeta"]);
        assert_eq!(models[1].submission_count, 2);

        assert_eq!(db.with_tx(|tx| delete_all_models(tx)).unwrap(), 2);
    }

    #[test]
    fn test_negative_sum_rejected() {
        let db = BenchDb::open_in_memory().unwrap();
        let bad = ModelAggregate { submission_count: -1, ..ModelAggregate::empty("m") };
        let err = db.with_tx(|tx| write_model(tx, &bad, 1)).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}
