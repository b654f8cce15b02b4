//! Out-of-band maintenance jobs
//!
//! Every job works in bounded batches, each batch its own transaction, so an
//! interrupted run loses at most one batch and the next run picks up where
//! the data left off. None of them keeps a cursor between invocations.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::aggregates::{self, RecomputedAggregates};
use crate::db::{self, submissions, votes, BenchDb};
use crate::error::StorageError;
use crate::validator;

use super::events::{BenchEvent, EventBus};

const BACKFILL_BATCH: u32 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub deleted: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillResult {
    pub updated: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReflagResult {
    pub scanned: u64,
    pub flagged: u64,
}

pub struct MaintenanceService {
    db: Arc<BenchDb>,
    events: Arc<EventBus>,
    cooldown_ms: i64,
}

impl MaintenanceService {
    pub fn new(db: Arc<BenchDb>, events: Arc<EventBus>, cooldown_ms: i64) -> Self {
        Self { db, events, cooldown_ms }
    }

    /// Delete aged-out ledger rows, oldest first.
    ///
    /// Counters are left alone: an expired vote keeps counting.
    pub fn sweep_expired_votes(&self, batch_size: u32, max_batches: u32) -> Result<SweepResult, StorageError> {
        self.sweep_expired_votes_at(batch_size, max_batches, db::current_timestamp_ms())
    }

    pub fn sweep_expired_votes_at(
        &self,
        batch_size: u32,
        max_batches: u32,
        now: i64,
    ) -> Result<SweepResult, StorageError> {
        if batch_size == 0 {
            return Err(StorageError::Validation("batchSize must be > 0".into()));
        }
        if max_batches == 0 {
            return Err(StorageError::Validation("maxBatches must be > 0".into()));
        }

        let cutoff = now - self.cooldown_ms;
        let mut result = SweepResult::default();
        for _ in 0..max_batches {
            let deleted = self.db.with_tx(|tx| votes::sweep_expired_batch(tx, cutoff, batch_size))?;
            result.deleted += deleted as u64;
            result.has_more = deleted == batch_size as usize;
            if !result.has_more {
                break;
            }
        }

        info!(deleted = result.deleted, has_more = result.has_more, "Swept expired votes");
        self.events.emit(BenchEvent::ExpiredVotesSwept {
            deleted: result.deleted,
            has_more: result.has_more,
        });
        Ok(result)
    }

    /// Overwrite every aggregate row with values rebuilt from the source tables
    pub fn recompute_all_aggregates(&self) -> Result<RecomputedAggregates, StorageError> {
        let now = db::current_timestamp_ms();
        let fresh = self.db.with_tx(|tx| aggregates::recompute_all(tx, now))?;

        self.events.emit(BenchEvent::AggregatesRecomputed {
            total_submissions: fresh.platform.total_submissions,
            models: fresh.models.len(),
        });
        Ok(fresh)
    }

    /// Give legacy ledger rows a cast time equal to their creation time
    pub fn backfill_missing_timestamps(&self) -> Result<BackfillResult, StorageError> {
        let mut result = BackfillResult::default();
        loop {
            let updated = self.db.with_tx(|tx| votes::backfill_cast_at(tx, BACKFILL_BATCH))?;
            result.updated += updated as u64;
            if updated < BACKFILL_BATCH as usize {
                break;
            }
        }

        info!(updated = result.updated, "Backfilled ledger timestamps");
        Ok(result)
    }

    /// Re-validate unflagged submissions and flag the ones that now fail
    pub fn reflag_invalid_submissions(&self, batch_size: u32) -> Result<ReflagResult, StorageError> {
        if batch_size == 0 {
            return Err(StorageError::Validation("batchSize must be > 0".into()));
        }

        let now = db::current_timestamp_ms();
        let mut result = ReflagResult::default();
        let mut cursor = 0i64;

        loop {
            let (scanned, flagged, last) = self.db.with_tx(|tx| {
                let batch = submissions::list_unflagged_after(tx, cursor, batch_size)?;
                let mut flagged = 0u64;
                for (_, row) in &batch {
                    let verdict = validator::validate(&**tx, row.claimed_entity_id, &row.claimed_name)?;
                    if !verdict.valid {
                        let reason = verdict.reason.unwrap_or_default();
                        submissions::set_flag(tx, &row.id, &reason)?;
                        aggregates::on_submission_flagged(tx, &row.model, now)?;
                        debug!(submission_id = %row.id, reason = %reason, "Submission reflagged");
                        flagged += 1;
                    }
                }
                Ok((batch.len() as u64, flagged, batch.last().map(|(rowid, _)| *rowid)))
            })?;

            result.scanned += scanned;
            result.flagged += flagged;
            match last {
                Some(rowid) if scanned == batch_size as u64 => cursor = rowid,
                _ => break,
            }
        }

        info!(scanned = result.scanned, flagged = result.flagged, "Reflagged submissions");
        self.events.emit(BenchEvent::SubmissionsReflagged {
            scanned: result.scanned,
            flagged: result.flagged,
        });
        Ok(result)
    }
}
