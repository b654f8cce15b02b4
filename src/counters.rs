//! Denormalized counter maintenance
//!
//! Applies ledger deltas to a submission's four vote counters. Must run in
//! the same transaction as the ledger write that produced the delta.

use rusqlite::Connection;

use crate::db::submissions::{self, VoteCounters};
use crate::error::StorageError;
use crate::ledger::CounterDelta;

/// Delta that actually landed on a submission after clamping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDelta {
    pub model: String,
    pub delta: CounterDelta,
}

fn clamp_add(current: i64, delta: i64) -> (i64, i64) {
    let next = (current + delta).max(0);
    (next, next - current)
}

/// Read-modify-write the counters of `submission_id`, flooring each at zero.
///
/// Returns the effective delta so aggregates receive exactly what was applied.
pub fn apply_delta(conn: &Connection, submission_id: &str, delta: &CounterDelta) -> Result<AppliedDelta, StorageError> {
    let (model, current) = submissions::read_counters(conn, submission_id)?
        .ok_or_else(|| StorageError::NotFound(format!("submission {}", submission_id)))?;

    if delta.is_zero() {
        return Ok(AppliedDelta { model, delta: CounterDelta::default() });
    }

    let (upvotes_visual, d_uv) = clamp_add(current.upvotes_visual, delta.upvotes_visual);
    let (downvotes_visual, d_dv) = clamp_add(current.downvotes_visual, delta.downvotes_visual);
    let (upvotes_factual, d_uf) = clamp_add(current.upvotes_factual, delta.upvotes_factual);
    let (downvotes_factual, d_df) = clamp_add(current.downvotes_factual, delta.downvotes_factual);

    let next = VoteCounters { upvotes_visual, downvotes_visual, upvotes_factual, downvotes_factual };
    submissions::write_counters(conn, submission_id, &next)?;

    Ok(AppliedDelta {
        model,
        delta: CounterDelta {
            upvotes_visual: d_uv,
            downvotes_visual: d_dv,
            upvotes_factual: d_uf,
            downvotes_factual: d_df,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::submissions::{insert_submission, NewSubmission};
    use crate::db::BenchDb;
    use crate::ledger::{Polarity, VoteKind};

    fn db() -> BenchDb {
        let db = BenchDb::open_in_memory().unwrap();
        db.with_tx(|tx| {
            insert_submission(tx, &NewSubmission {
                id: "s1".into(),
                model: "model-x".into(),
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
    fn test_apply_and_clamp() {
        let db = db();
        let up = CounterDelta::single(VoteKind::Visual, Polarity::Up, 1);
        let applied = db.with_tx(|tx| apply_delta(tx, "s1", &up)).unwrap();
        assert_eq!(applied.model, "model-x");
        assert_eq!(applied.delta, up);

        // Flip: -1 up lands, -1 down is floored to 0
        let flip = CounterDelta::single(VoteKind::Visual, Polarity::Up, -2)
            .combine(&CounterDelta::single(VoteKind::Factual, Polarity::Down, -1));
        let applied = db.with_tx(|tx| apply_delta(tx, "s1", &flip)).unwrap();
        assert_eq!(applied.delta.upvotes_visual, -1);
        assert_eq!(applied.delta.downvotes_factual, 0);

        let row = db
            .with_conn(|conn| submissions::get_submission(conn, "s1"))
            .unwrap()
            .unwrap();
        assert_eq!(row.counters(), VoteCounters::default());
    }

    #[test]
    fn test_missing_submission_is_not_found() {
        let db = db();
        let err = db
            .with_tx(|tx| apply_delta(tx, "ghost", &CounterDelta::default()))
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
