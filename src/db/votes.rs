//! Vote ledger persistence

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::StorageError;
use crate::ledger::{LedgerEntry, Polarity, VoteKind};

const LEDGER_COLUMNS: &str = "id, client_id, submission_id, kind, polarity, cast_at, created_at";

fn parse_column<T>(row: &Row, idx: usize) -> Result<T, rusqlite::Error>
where
    T: std::str::FromStr<Err = StorageError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn entry_from_row(row: &Row) -> Result<LedgerEntry, rusqlite::Error> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        client_id: row.get(1)?,
        submission_id: row.get(2)?,
        kind: parse_column::<VoteKind>(row, 3)?,
        polarity: parse_column::<Polarity>(row, 4)?,
        cast_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Most recent ledger row for a (client, submission, kind) key.
///
/// Rows lacking `cast_at` sort below every timestamped row.
pub fn latest_entry(
    conn: &Connection,
    client_id: &str,
    submission_id: &str,
    kind: VoteKind,
) -> Result<Option<LedgerEntry>, StorageError> {
    let sql = format!(
        "SELECT {} FROM votes WHERE client_id = ? AND submission_id = ? AND kind = ? \
         ORDER BY COALESCE(cast_at, -1) DESC, id DESC LIMIT 1",
        LEDGER_COLUMNS
    );
    conn.query_row(&sql, params![client_id, submission_id, kind.as_str()], entry_from_row)
        .optional()
        .map_err(StorageError::from)
}

/// Append a ledger row, returning its id
pub fn insert_entry(
    conn: &Connection,
    client_id: &str,
    submission_id: &str,
    kind: VoteKind,
    polarity: Polarity,
    cast_at: i64,
) -> Result<i64, StorageError> {
    conn.execute(
        "INSERT INTO votes (client_id, submission_id, kind, polarity, cast_at, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
        params![client_id, submission_id, kind.as_str(), polarity.as_str(), cast_at, cast_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Flip a row's polarity and refresh its cast time
pub fn update_entry(conn: &Connection, entry_id: i64, polarity: Polarity, cast_at: i64) -> Result<(), StorageError> {
    let changed = conn.execute(
        "UPDATE votes SET polarity = ?, cast_at = ? WHERE id = ?",
        params![polarity.as_str(), cast_at, entry_id],
    )?;
    if changed == 0 {
        return Err(StorageError::Conflict(format!("ledger row {} vanished", entry_id)));
    }
    Ok(())
}

pub fn delete_entry(conn: &Connection, entry_id: i64) -> Result<(), StorageError> {
    let changed = conn.execute("DELETE FROM votes WHERE id = ?", params![entry_id])?;
    if changed == 0 {
        return Err(StorageError::Conflict(format!("ledger row {} vanished", entry_id)));
    }
    Ok(())
}

/// Submissions the client has any ledger row of `kind` for
pub fn voted_submission_ids(conn: &Connection, client_id: &str, kind: VoteKind) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT submission_id FROM votes WHERE client_id = ? AND kind = ? ORDER BY submission_id",
    )?;
    let ids = stmt
        .query_map(params![client_id, kind.as_str()], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Number of ledger rows for a submission addressed by (kind, polarity)
pub fn count_rows(
    conn: &Connection,
    submission_id: &str,
    kind: VoteKind,
    polarity: Polarity,
) -> Result<i64, StorageError> {
    conn.query_row(
        "SELECT COUNT(*) FROM votes WHERE submission_id = ? AND kind = ? AND polarity = ?",
        params![submission_id, kind.as_str(), polarity.as_str()],
        |row| row.get(0),
    )
    .map_err(StorageError::from)
}

/// Delete up to `limit` rows whose `cast_at` is older than `cutoff`.
///
/// Rows without `cast_at` are left for the backfill job.
pub fn sweep_expired_batch(conn: &Connection, cutoff: i64, limit: u32) -> Result<usize, StorageError> {
    let deleted = conn.execute(
        "DELETE FROM votes WHERE id IN ( \
             SELECT id FROM votes WHERE cast_at IS NOT NULL AND cast_at < ? \
             ORDER BY cast_at LIMIT ? \
         )",
        params![cutoff, limit as i64],
    )?;
    debug!(deleted, cutoff, "Swept expired ledger rows");
    Ok(deleted)
}

/// Set `cast_at = created_at` on up to `limit` legacy rows
pub fn backfill_cast_at(conn: &Connection, limit: u32) -> Result<usize, StorageError> {
    let updated = conn.execute(
        "UPDATE votes SET cast_at = created_at WHERE id IN ( \
             SELECT id FROM votes WHERE cast_at IS NULL ORDER BY id LIMIT ? \
         )",
        params![limit as i64],
    )?;
    Ok(updated)
}

/// Insert a row without a cast time, as written before timestamps existed
#[cfg(test)]
pub fn insert_legacy_entry(
    conn: &Connection,
    client_id: &str,
    submission_id: &str,
    kind: VoteKind,
    polarity: Polarity,
    created_at: i64,
) -> Result<i64, StorageError> {
    conn.execute(
        "INSERT INTO votes (client_id, submission_id, kind, polarity, cast_at, created_at) \
         VALUES (?, ?, ?, ?, NULL, ?)",
        params![client_id, submission_id, kind.as_str(), polarity.as_str(), created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::submissions::{insert_submission, NewSubmission};
    use crate::db::BenchDb;

    fn db_with_submission() -> BenchDb {
        let db = BenchDb::open_in_memory().unwrap();
        db.with_tx(|tx| {
            insert_submission(tx, &NewSubmission {
                id: "s1".into(),
                model: "m".into(),
                claimed_name: "Example".into(),
                claimed_entity_id: 7,
                description: String::new(),
                media: "<svg/>".into(),
                is_flagged: false,
                flag_reason: None,
                created_at: 0,
            })
        })
        .unwrap();
        db
    }

    #[test]
    fn test_latest_entry_prefers_newest_cast() {
        let db = db_with_submission();
        db.with_tx(|tx| {
            insert_legacy_entry(tx, "c", "s1", VoteKind::Visual, Polarity::Down, 500)?;
            insert_entry(tx, "c", "s1", VoteKind::Visual, Polarity::Up, 100)?;
            insert_entry(tx, "c", "s1", VoteKind::Factual, Polarity::Down, 900)?;
            Ok(())
        })
        .unwrap();

        let latest = db
            .with_conn(|conn| latest_entry(conn, "c", "s1", VoteKind::Visual))
            .unwrap()
            .unwrap();
        assert_eq!(latest.polarity, Polarity::Up);
        assert_eq!(latest.cast_at, Some(100));

        assert!(db
            .with_conn(|conn| latest_entry(conn, "other", "s1", VoteKind::Visual))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_and_delete_entry() {
        let db = db_with_submission();
        let id = db
            .with_tx(|tx| insert_entry(tx, "c", "s1", VoteKind::Visual, Polarity::Up, 10))
            .unwrap();

        db.with_tx(|tx| update_entry(tx, id, Polarity::Down, 20)).unwrap();
        assert_eq!(
            db.with_conn(|conn| count_rows(conn, "s1", VoteKind::Visual, Polarity::Down)).unwrap(),
            1
        );

        db.with_tx(|tx| delete_entry(tx, id)).unwrap();
        let err = db.with_tx(|tx| delete_entry(tx, id)).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn test_sweep_respects_cutoff_and_skips_legacy_rows() {
        let db = db_with_submission();
        db.with_tx(|tx| {
            insert_entry(tx, "a", "s1", VoteKind::Visual, Polarity::Up, 10)?;
            insert_entry(tx, "b", "s1", VoteKind::Visual, Polarity::Up, 20)?;
            insert_entry(tx, "c", "s1", VoteKind::Visual, Polarity::Up, 30)?;
            insert_legacy_entry(tx, "d", "s1", VoteKind::Visual, Polarity::Up, 5)?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.with_tx(|tx| sweep_expired_batch(tx, 30, 1)).unwrap(), 1);
        assert_eq!(db.with_tx(|tx| sweep_expired_batch(tx, 30, 10)).unwrap(), 1);
        assert_eq!(db.with_tx(|tx| sweep_expired_batch(tx, 30, 10)).unwrap(), 0);
        assert_eq!(db.stats().unwrap().ledger_rows, 2);

        assert_eq!(db.with_tx(|tx| backfill_cast_at(tx, 10)).unwrap(), 1);
        let legacy = db
            .with_conn(|conn| latest_entry(conn, "d", "s1", VoteKind::Visual))
            .unwrap()
            .unwrap();
        assert_eq!(legacy.cast_at, Some(5));
    }

    #[test]
    fn test_voted_submission_ids_by_kind() {
        let db = db_with_submission();
        db.with_tx(|tx| {
            insert_entry(tx, "c", "s1", VoteKind::Factual, Polarity::Up, 200)?;
            Ok(())
        })
        .unwrap();

        assert!(db.with_conn(|conn| voted_submission_ids(conn, "c", VoteKind::Visual)).unwrap().is_empty());

        db.with_tx(|tx| insert_legacy_entry(tx, "c", "s1", VoteKind::Visual, Polarity::Down, 10))
            .unwrap();
        assert_eq!(
            db.with_conn(|conn| voted_submission_ids(conn, "c", VoteKind::Visual)).unwrap(),
            vec!["s1"]
        );
    }

    #[test]
    fn test_ledger_rows_cascade_with_submission() {
        let db = db_with_submission();
        db.with_tx(|tx| insert_entry(tx, "c", "s1", VoteKind::Visual, Polarity::Up, 1))
            .unwrap();
        db.with_tx(|tx| {
            tx.execute("DELETE FROM submissions WHERE id = 's1'", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.stats().unwrap().ledger_rows, 0);
    }
}
