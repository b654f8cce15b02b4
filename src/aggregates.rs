//! Incremental aggregate engine
//!
//! Keeps the platform singleton and the per-model rows in step with the
//! submission table on every write, so reading statistics never scans
//! submissions or the ledger. Every entry point runs inside the caller's
//! transaction; a failure here aborts the ledger and counter writes too.
//!
//! [`recompute_all`] is the escape hatch: it rebuilds every aggregate row
//! from the source tables and overwrites what is stored.

use std::cmp::Ordering;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::stats::{self, ModelAggregate, PlatformAggregate};
use crate::db::submissions;
use crate::error::StorageError;
use crate::ledger::CounterDelta;

fn add_floor(current: i64, delta: i64) -> i64 {
    (current + delta).max(0)
}

/// Account for a newly persisted submission.
///
/// Must run after the submission row is inserted: entity coverage is decided
/// by looking for any *other* submission of the same entity.
pub fn on_submission_created(
    conn: &Connection,
    submission_id: &str,
    model: &str,
    entity_id: i64,
    flagged: bool,
    now: i64,
) -> Result<(), StorageError> {
    let mut platform = stats::get_or_create_platform(conn, now)?;
    platform.total_submissions += 1;
    if flagged {
        platform.total_flagged += 1;
    }
    if !submissions::entity_claimed_elsewhere(conn, entity_id, submission_id)? {
        platform.unique_entities_covered += 1;
    }
    stats::write_platform(conn, &platform, now)?;

    let mut model_agg = stats::get_or_create_model(conn, model, now)?;
    model_agg.submission_count += 1;
    if flagged {
        model_agg.flagged_count += 1;
    }
    stats::write_model(conn, &model_agg, now)?;

    debug!(submission_id = %submission_id, model = %model, flagged, "Aggregates updated for new submission");
    Ok(())
}

/// Apply the counter maintainer's effective delta to model sums and the vote total
pub fn on_vote_delta(conn: &Connection, model: &str, delta: &CounterDelta, now: i64) -> Result<(), StorageError> {
    if delta.is_zero() {
        return Ok(());
    }

    let mut model_agg = stats::get_or_create_model(conn, model, now)?;
    model_agg.upvotes_visual_sum = add_floor(model_agg.upvotes_visual_sum, delta.upvotes_visual);
    model_agg.downvotes_visual_sum = add_floor(model_agg.downvotes_visual_sum, delta.downvotes_visual);
    model_agg.upvotes_factual_sum = add_floor(model_agg.upvotes_factual_sum, delta.upvotes_factual);
    model_agg.downvotes_factual_sum = add_floor(model_agg.downvotes_factual_sum, delta.downvotes_factual);
    stats::write_model(conn, &model_agg, now)?;

    let mut platform = stats::get_or_create_platform(conn, now)?;
    platform.total_votes = add_floor(platform.total_votes, delta.total());
    stats::write_platform(conn, &platform, now)?;

    Ok(())
}

/// Account for an existing submission that became flagged
pub fn on_submission_flagged(conn: &Connection, model: &str, now: i64) -> Result<(), StorageError> {
    let mut platform = stats::get_or_create_platform(conn, now)?;
    platform.total_flagged += 1;
    stats::write_platform(conn, &platform, now)?;

    let mut model_agg = stats::get_or_create_model(conn, model, now)?;
    model_agg.flagged_count += 1;
    stats::write_model(conn, &model_agg, now)
}

/// Account for newly seeded reference entries
pub fn on_reference_seeded(conn: &Connection, inserted: u64, now: i64) -> Result<(), StorageError> {
    let mut platform = stats::get_or_create_platform(conn, now)?;
    if inserted == 0 {
        return Ok(());
    }
    platform.total_entities += inserted as i64;
    stats::write_platform(conn, &platform, now)
}

/// Aggregate values derived straight from the source tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputedAggregates {
    pub platform: PlatformAggregate,
    pub models: Vec<ModelAggregate>,
}

/// Compute aggregates from submissions and the reference table without writing
pub fn compute_from_source(conn: &Connection) -> Result<RecomputedAggregates, StorageError> {
    let platform = conn.query_row(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(upvotes_visual + downvotes_visual + upvotes_factual + downvotes_factual), 0),
            COALESCE(SUM(is_flagged), 0),
            COUNT(DISTINCT claimed_entity_id),
            (SELECT COUNT(*) FROM reference_entries)
        FROM submissions
        "#,
        [],
        |row| {
            Ok(PlatformAggregate {
                total_submissions: row.get(0)?,
                total_votes: row.get(1)?,
                total_flagged: row.get(2)?,
                unique_entities_covered: row.get(3)?,
                total_entities: row.get(4)?,
            })
        },
    )?;

    let mut stmt = conn.prepare(
        r#"
        SELECT model, COUNT(*),
               SUM(upvotes_visual), SUM(downvotes_visual),
               SUM(upvotes_factual), SUM(downvotes_factual),
               SUM(is_flagged)
        FROM submissions
        GROUP BY model
        ORDER BY model
        "#,
    )?;
    let models = stmt
        .query_map([], |row| {
            Ok(ModelAggregate {
                model: row.get(0)?,
                submission_count: row.get(1)?,
                upvotes_visual_sum: row.get(2)?,
                downvotes_visual_sum: row.get(3)?,
                upvotes_factual_sum: row.get(4)?,
                downvotes_factual_sum: row.get(5)?,
                flagged_count: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RecomputedAggregates { platform, models })
}

/// Rebuild and overwrite every aggregate row. Models without submissions are dropped.
pub fn recompute_all(conn: &Connection, now: i64) -> Result<RecomputedAggregates, StorageError> {
    let fresh = compute_from_source(conn)?;

    stats::delete_all_models(conn)?;
    for model in &fresh.models {
        stats::write_model(conn, model, now)?;
    }
    stats::write_platform(conn, &fresh.platform, now)?;

    info!(
        submissions = fresh.platform.total_submissions,
        votes = fresh.platform.total_votes,
        models = fresh.models.len(),
        "Recomputed aggregates"
    );
    Ok(fresh)
}

/// Model aggregate with its derived rates
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    #[serde(flatten)]
    pub aggregate: ModelAggregate,
    pub avg_net_score_visual: f64,
    pub avg_net_score_factual: f64,
    /// Percentage of flagged submissions
    pub flag_rate: f64,
}

impl From<ModelAggregate> for ModelStats {
    fn from(aggregate: ModelAggregate) -> Self {
        let count = aggregate.submission_count;
        let per_submission = |value: i64| if count > 0 { value as f64 / count as f64 } else { 0.0 };

        Self {
            avg_net_score_visual: per_submission(aggregate.upvotes_visual_sum - aggregate.downvotes_visual_sum),
            avg_net_score_factual: per_submission(aggregate.upvotes_factual_sum - aggregate.downvotes_factual_sum),
            flag_rate: per_submission(aggregate.flagged_count) * 100.0,
            aggregate,
        }
    }
}

/// Platform aggregate with derived rate and per-model breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    #[serde(flatten)]
    pub platform: PlatformAggregate,
    pub flag_rate: f64,
    /// Sorted by visual net score, best first
    pub models: Vec<ModelStats>,
}

/// Read the stored aggregates; no source table is scanned
pub fn platform_stats(conn: &Connection) -> Result<PlatformStats, StorageError> {
    let platform = stats::load_platform(conn)?.unwrap_or_default();
    let flag_rate = if platform.total_submissions > 0 {
        platform.total_flagged as f64 / platform.total_submissions as f64 * 100.0
    } else {
        0.0
    };

    let mut models: Vec<ModelStats> = stats::list_models(conn)?.into_iter().map(ModelStats::from).collect();
    models.sort_by(|a, b| {
        b.avg_net_score_visual
            .partial_cmp(&a.avg_net_score_visual)
            .unwrap_or(Ordering::Equal)
    });

    Ok(PlatformStats { platform, flag_rate, models })
}
