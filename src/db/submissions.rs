//! Submission CRUD operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;

const SUBMISSION_COLUMNS: &str = "id, model, claimed_name, claimed_entity_id, description, media, \
     upvotes_visual, downvotes_visual, upvotes_factual, downvotes_factual, \
     is_flagged, flag_reason, created_at";

/// Submission row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRow {
    pub id: String,
    pub model: String,
    pub claimed_name: String,
    pub claimed_entity_id: i64,
    pub description: String,
    /// SVG markup
    pub media: String,
    pub upvotes_visual: i64,
    pub downvotes_visual: i64,
    pub upvotes_factual: i64,
    pub downvotes_factual: i64,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub created_at: i64,
}

impl SubmissionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            model: row.get("model")?,
            claimed_name: row.get("claimed_name")?,
            claimed_entity_id: row.get("claimed_entity_id")?,
            description: row.get("description")?,
            media: row.get("media")?,
            upvotes_visual: row.get("upvotes_visual")?,
            downvotes_visual: row.get("downvotes_visual")?,
            upvotes_factual: row.get("upvotes_factual")?,
            downvotes_factual: row.get("downvotes_factual")?,
            is_flagged: row.get("is_flagged")?,
            flag_reason: row.get("flag_reason")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn net_score_visual(&self) -> i64 {
        self.upvotes_visual - self.downvotes_visual
    }

    pub fn net_score_factual(&self) -> i64 {
        self.upvotes_factual - self.downvotes_factual
    }

    pub fn counters(&self) -> VoteCounters {
        VoteCounters {
            upvotes_visual: self.upvotes_visual,
            downvotes_visual: self.downvotes_visual,
            upvotes_factual: self.upvotes_factual,
            downvotes_factual: self.downvotes_factual,
        }
    }
}

/// The four denormalized counters of one submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCounters {
    pub upvotes_visual: i64,
    pub downvotes_visual: i64,
    pub upvotes_factual: i64,
    pub downvotes_factual: i64,
}

/// Submission to persist; counters start at zero
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub id: String,
    pub model: String,
    pub claimed_name: String,
    pub claimed_entity_id: i64,
    pub description: String,
    pub media: String,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub created_at: i64,
}

/// Listing order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Newest,
    Oldest,
    MostUpvoted,
}

/// Query parameters for listing submissions - camelCase for URL params
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionQuery {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 { 20 }

impl Default for SubmissionQuery {
    fn default() -> Self {
        Self {
            model: None,
            sort_by: SortBy::Newest,
            limit: default_limit(),
            offset: 0,
        }
    }
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<SubmissionRow>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| SubmissionRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Insert a new submission
pub fn insert_submission(conn: &Connection, input: &NewSubmission) -> Result<(), StorageError> {
    conn.execute(
        r#"
        INSERT INTO submissions (
            id, model, claimed_name, claimed_entity_id, description, media,
            is_flagged, flag_reason, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.id,
            input.model,
            input.claimed_name,
            input.claimed_entity_id,
            input.description,
            input.media,
            input.is_flagged,
            input.flag_reason,
            input.created_at,
        ],
    )?;
    Ok(())
}

/// Get a submission by id
pub fn get_submission(conn: &Connection, id: &str) -> Result<Option<SubmissionRow>, StorageError> {
    let sql = format!("SELECT {} FROM submissions WHERE id = ?", SUBMISSION_COLUMNS);
    conn.query_row(&sql, params![id], |row| SubmissionRow::from_row(row))
        .optional()
        .map_err(StorageError::from)
}

/// Read a submission's model and counters
pub fn read_counters(conn: &Connection, id: &str) -> Result<Option<(String, VoteCounters)>, StorageError> {
    conn.query_row(
        "SELECT model, upvotes_visual, downvotes_visual, upvotes_factual, downvotes_factual \
         FROM submissions WHERE id = ?",
        params![id],
        |row| {
            Ok((
                row.get(0)?,
                VoteCounters {
                    upvotes_visual: row.get(1)?,
                    downvotes_visual: row.get(2)?,
                    upvotes_factual: row.get(3)?,
                    downvotes_factual: row.get(4)?,
                },
            ))
        },
    )
    .optional()
    .map_err(StorageError::from)
}

/// Overwrite a submission's counters
pub fn write_counters(conn: &Connection, id: &str, counters: &VoteCounters) -> Result<(), StorageError> {
    let changed = conn.execute(
        "UPDATE submissions SET upvotes_visual = ?, downvotes_visual = ?, \
         upvotes_factual = ?, downvotes_factual = ? WHERE id = ?",
        params![
            counters.upvotes_visual,
            counters.downvotes_visual,
            counters.upvotes_factual,
            counters.downvotes_factual,
            id,
        ],
    )?;
    if changed == 0 {
        return Err(StorageError::NotFound(format!("submission {}", id)));
    }
    Ok(())
}

/// Whether any submission other than `exclude_id` claims `entity_id`
pub fn entity_claimed_elsewhere(conn: &Connection, entity_id: i64, exclude_id: &str) -> Result<bool, StorageError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM submissions WHERE claimed_entity_id = ? AND id != ? LIMIT 1",
            params![entity_id, exclude_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Mark a submission as flagged
pub fn set_flag(conn: &Connection, id: &str, reason: &str) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE submissions SET is_flagged = 1, flag_reason = ? WHERE id = ?",
        params![reason, id],
    )?;
    Ok(())
}

/// List submissions with optional model filter
pub fn list_submissions(conn: &Connection, query: &SubmissionQuery) -> Result<Vec<SubmissionRow>, StorageError> {
    let order = match query.sort_by {
        SortBy::Newest => "created_at DESC, rowid DESC",
        SortBy::Oldest => "created_at ASC, rowid ASC",
        SortBy::MostUpvoted => "upvotes_visual DESC, rowid ASC",
    };

    let limit = query.limit as i64;
    let offset = query.offset as i64;

    match query.model {
        Some(ref model) => {
            let sql = format!(
                "SELECT {} FROM submissions WHERE model = ? ORDER BY {} LIMIT ? OFFSET ?",
                SUBMISSION_COLUMNS, order
            );
            query_rows(conn, &sql, &[model, &limit, &offset])
        }
        None => {
            let sql = format!(
                "SELECT {} FROM submissions ORDER BY {} LIMIT ? OFFSET ?",
                SUBMISSION_COLUMNS, order
            );
            query_rows(conn, &sql, &[&limit, &offset])
        }
    }
}

/// Submissions claiming a given entity
pub fn list_by_entity(conn: &Connection, entity_id: i64) -> Result<Vec<SubmissionRow>, StorageError> {
    let sql = format!(
        "SELECT {} FROM submissions WHERE claimed_entity_id = ? ORDER BY created_at DESC, rowid DESC",
        SUBMISSION_COLUMNS
    );
    query_rows(conn, &sql, &[&entity_id])
}

/// Submissions ranked by visual net score; ties keep insertion order
pub fn list_ranked_visual(conn: &Connection, model: Option<&str>, limit: u32) -> Result<Vec<SubmissionRow>, StorageError> {
    let limit = limit as i64;
    match model {
        Some(model) => {
            let sql = format!(
                "SELECT {} FROM submissions WHERE model = ? \
                 ORDER BY (upvotes_visual - downvotes_visual) DESC, rowid ASC LIMIT ?",
                SUBMISSION_COLUMNS
            );
            query_rows(conn, &sql, &[&model, &limit])
        }
        None => {
            let sql = format!(
                "SELECT {} FROM submissions \
                 ORDER BY (upvotes_visual - downvotes_visual) DESC, rowid ASC LIMIT ?",
                SUBMISSION_COLUMNS
            );
            query_rows(conn, &sql, &[&limit])
        }
    }
}

/// Window of submissions ordered by creation time
pub fn list_window(conn: &Connection, newest_first: bool, limit: u32) -> Result<Vec<SubmissionRow>, StorageError> {
    let order = if newest_first { "created_at DESC, rowid DESC" } else { "created_at ASC, rowid ASC" };
    let sql = format!("SELECT {} FROM submissions ORDER BY {} LIMIT ?", SUBMISSION_COLUMNS, order);
    query_rows(conn, &sql, &[&(limit as i64)])
}

/// Case-insensitive substring search on the claimed name
pub fn search(conn: &Connection, text: &str, model: Option<&str>, limit: u32) -> Result<Vec<SubmissionRow>, StorageError> {
    let pattern = format!("%{}%", escape_like(text.trim()));
    let limit = limit as i64;

    debug!(pattern = %pattern, model = ?model, "Searching submissions");

    match model {
        Some(model) => {
            let sql = format!(
                "SELECT {} FROM submissions WHERE claimed_name LIKE ? ESCAPE '\\' AND model = ? \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
                SUBMISSION_COLUMNS
            );
            query_rows(conn, &sql, &[&pattern, &model, &limit])
        }
        None => {
            let sql = format!(
                "SELECT {} FROM submissions WHERE claimed_name LIKE ? ESCAPE '\\' \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
                SUBMISSION_COLUMNS
            );
            query_rows(conn, &sql, &[&pattern, &limit])
        }
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Unflagged submissions after a rowid cursor, for resumable maintenance passes
pub fn list_unflagged_after(
    conn: &Connection,
    after_rowid: i64,
    limit: u32,
) -> Result<Vec<(i64, SubmissionRow)>, StorageError> {
    let sql = format!(
        "SELECT rowid, {} FROM submissions WHERE is_flagged = 0 AND rowid > ? ORDER BY rowid LIMIT ?",
        SUBMISSION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![after_rowid, limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, SubmissionRow::from_row(row)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
