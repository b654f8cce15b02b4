//! Vote service
//!
//! Runs each cast or removal as one transaction: ledger lookup, decision,
//! counter update, ledger write and aggregate update commit together. The
//! rate limiter is consulted before the transaction opens.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregates;
use crate::counters;
use crate::db::{self, votes, BenchDb};
use crate::error::StorageError;
use crate::ledger::{
    decide_cast, decide_remove, CastAction, CounterDelta, LedgerWrite, Polarity, SlotState, VoteKind,
};
use crate::rate_limit::{Operation, RateLimiter};

use super::events::{BenchEvent, EventBus};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub client_id: String,
    pub submission_id: String,
    pub kind: VoteKind,
    pub polarity: Polarity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchVoteItem {
    pub submission_id: String,
    pub polarity: Polarity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchVoteRequest {
    pub client_id: String,
    pub kind: VoteKind,
    pub votes: Vec<BatchVoteItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveVoteRequest {
    pub client_id: String,
    pub submission_id: String,
    pub kind: VoteKind,
}

/// Result of one cast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastOutcome {
    pub action: CastAction,
    pub prior_polarity: Option<Polarity>,
    /// Counter change that was applied, after flooring at zero
    pub delta: CounterDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    pub removed: bool,
    pub prior_polarity: Option<Polarity>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub submission_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CastOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub items: Vec<BatchItemResult>,
}

/// A client's current vote on one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientVote {
    pub submission_id: String,
    pub visual: Option<Polarity>,
    pub factual: Option<Polarity>,
}

pub struct VoteService {
    db: Arc<BenchDb>,
    events: Arc<EventBus>,
    limiter: Arc<RateLimiter>,
    cooldown_ms: i64,
    max_batch_votes: usize,
}

impl VoteService {
    pub fn new(
        db: Arc<BenchDb>,
        events: Arc<EventBus>,
        limiter: Arc<RateLimiter>,
        cooldown_ms: i64,
        max_batch_votes: usize,
    ) -> Self {
        Self { db, events, limiter, cooldown_ms, max_batch_votes }
    }

    pub fn cooldown_ms(&self) -> i64 {
        self.cooldown_ms
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub fn cast_vote(&self, request: &CastVoteRequest) -> Result<CastOutcome, StorageError> {
        self.cast_vote_at(request, db::current_timestamp_ms())
    }

    pub fn cast_vote_at(&self, request: &CastVoteRequest, now: i64) -> Result<CastOutcome, StorageError> {
        require_present("clientId", &request.client_id)?;
        require_present("submissionId", &request.submission_id)?;
        self.limiter.check_at(Operation::CastVote, &request.client_id, now)?;

        self.cast_one(&request.client_id, &request.submission_id, request.kind, request.polarity, now)
    }

    /// Cast several votes of one kind; each item commits or fails on its own
    pub fn cast_votes_batch(&self, request: &BatchVoteRequest) -> Result<BatchResult, StorageError> {
        self.cast_votes_batch_at(request, db::current_timestamp_ms())
    }

    pub fn cast_votes_batch_at(&self, request: &BatchVoteRequest, now: i64) -> Result<BatchResult, StorageError> {
        require_present("clientId", &request.client_id)?;
        if request.votes.is_empty() {
            return Err(StorageError::Validation("votes must not be empty".into()));
        }
        if request.votes.len() > self.max_batch_votes {
            return Err(StorageError::Validation(format!(
                "batch of {} votes exceeds the limit of {}",
                request.votes.len(),
                self.max_batch_votes
            )));
        }
        self.limiter.check_at(Operation::CastVotesBatch, &request.client_id, now)?;

        let mut result = BatchResult::default();
        for item in &request.votes {
            result.processed += 1;
            let outcome = require_present("submissionId", &item.submission_id).and_then(|_| {
                self.cast_one(&request.client_id, &item.submission_id, request.kind, item.polarity, now)
            });

            match outcome {
                Ok(outcome) => {
                    match outcome.action {
                        CastAction::Created => result.created += 1,
                        CastAction::Updated => result.updated += 1,
                        CastAction::Unchanged => result.unchanged += 1,
                    }
                    result.items.push(BatchItemResult {
                        submission_id: item.submission_id.clone(),
                        outcome: Some(outcome),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(submission_id = %item.submission_id, error = %e, "Batch vote item failed");
                    result.failed += 1;
                    result.items.push(BatchItemResult {
                        submission_id: item.submission_id.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        debug!(
            processed = result.processed,
            created = result.created,
            updated = result.updated,
            unchanged = result.unchanged,
            failed = result.failed,
            "Batch vote processed"
        );
        Ok(result)
    }

    fn cast_one(
        &self,
        client_id: &str,
        submission_id: &str,
        kind: VoteKind,
        polarity: Polarity,
        now: i64,
    ) -> Result<CastOutcome, StorageError> {
        let cooldown_ms = self.cooldown_ms;
        let outcome = self.db.with_tx(|tx| {
            let latest = votes::latest_entry(tx, client_id, submission_id, kind)?;
            let state = SlotState::of(latest.as_ref(), now, cooldown_ms);
            let decision = decide_cast(state, kind, polarity, now);

            // Fails with NotFound before any ledger write if the submission is gone
            let applied = counters::apply_delta(tx, submission_id, &decision.delta)?;
            apply_write(tx, client_id, submission_id, kind, decision.write)?;
            aggregates::on_vote_delta(tx, &applied.model, &applied.delta, now)?;

            Ok(CastOutcome {
                action: decision.action,
                prior_polarity: decision.prior_polarity,
                delta: applied.delta,
            })
        })?;

        debug!(
            submission_id = %submission_id,
            kind = %kind,
            polarity = %polarity,
            action = ?outcome.action,
            "Vote cast"
        );
        if outcome.action != CastAction::Unchanged {
            self.events.emit(BenchEvent::VoteCast {
                submission_id: submission_id.to_string(),
                kind,
                polarity,
                action: outcome.action,
            });
        }
        Ok(outcome)
    }

    /// Retract the client's active vote; aged-out votes cannot be retracted
    pub fn remove_vote(&self, request: &RemoveVoteRequest) -> Result<RemoveOutcome, StorageError> {
        self.remove_vote_at(request, db::current_timestamp_ms())
    }

    pub fn remove_vote_at(&self, request: &RemoveVoteRequest, now: i64) -> Result<RemoveOutcome, StorageError> {
        require_present("clientId", &request.client_id)?;
        require_present("submissionId", &request.submission_id)?;
        self.limiter.check_at(Operation::RemoveVote, &request.client_id, now)?;

        let cooldown_ms = self.cooldown_ms;
        let (client_id, submission_id, kind) = (&request.client_id, &request.submission_id, request.kind);
        let outcome = self.db.with_tx(|tx| {
            let latest = votes::latest_entry(tx, client_id, submission_id, kind)?;
            let decision = decide_remove(SlotState::of(latest.as_ref(), now, cooldown_ms), kind);

            let applied = counters::apply_delta(tx, submission_id, &decision.delta)?;
            apply_write(tx, client_id, submission_id, kind, decision.write)?;
            aggregates::on_vote_delta(tx, &applied.model, &applied.delta, now)?;

            Ok(RemoveOutcome {
                removed: decision.removed,
                prior_polarity: decision.prior_polarity,
            })
        })?;

        if outcome.removed {
            debug!(submission_id = %submission_id, kind = %kind, "Vote removed");
            self.events.emit(BenchEvent::VoteRemoved {
                submission_id: submission_id.clone(),
                kind,
            });
        }
        Ok(outcome)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// The client's active polarity per kind for each requested submission
    pub fn client_votes(&self, client_id: &str, submission_ids: &[String]) -> Result<Vec<ClientVote>, StorageError> {
        self.client_votes_at(client_id, submission_ids, db::current_timestamp_ms())
    }

    pub fn client_votes_at(
        &self,
        client_id: &str,
        submission_ids: &[String],
        now: i64,
    ) -> Result<Vec<ClientVote>, StorageError> {
        require_present("clientId", client_id)?;
        if submission_ids.len() > self.max_batch_votes {
            return Err(StorageError::Validation(format!(
                "at most {} submission ids per request",
                self.max_batch_votes
            )));
        }

        self.db.with_conn(|conn| {
            submission_ids
                .iter()
                .map(|id| {
                    Ok::<_, StorageError>(ClientVote {
                        submission_id: id.clone(),
                        visual: self.active_polarity(conn, client_id, id, VoteKind::Visual, now)?,
                        factual: self.active_polarity(conn, client_id, id, VoteKind::Factual, now)?,
                    })
                })
                .collect()
        })
    }

    fn active_polarity(
        &self,
        conn: &Connection,
        client_id: &str,
        submission_id: &str,
        kind: VoteKind,
        now: i64,
    ) -> Result<Option<Polarity>, StorageError> {
        let latest = votes::latest_entry(conn, client_id, submission_id, kind)?;
        Ok(SlotState::of(latest.as_ref(), now, self.cooldown_ms).active_polarity())
    }

    /// Submissions the client has cast a visual vote on
    pub fn client_voted_ids(&self, client_id: &str) -> Result<Vec<String>, StorageError> {
        require_present("clientId", client_id)?;
        self.db
            .with_conn(|conn| votes::voted_submission_ids(conn, client_id, VoteKind::Visual))
    }
}

fn require_present(field: &str, value: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn apply_write(
    conn: &Connection,
    client_id: &str,
    submission_id: &str,
    kind: VoteKind,
    write: LedgerWrite,
) -> Result<(), StorageError> {
    match write {
        LedgerWrite::None => Ok(()),
        LedgerWrite::Insert { polarity, cast_at } => {
            votes::insert_entry(conn, client_id, submission_id, kind, polarity, cast_at).map(|_| ())
        }
        LedgerWrite::Update { entry_id, polarity, cast_at } => votes::update_entry(conn, entry_id, polarity, cast_at),
        LedgerWrite::Delete { entry_id } => votes::delete_entry(conn, entry_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitsConfig;
    use crate::db::stats;
    use crate::db::submissions::{self, insert_submission, NewSubmission};
    use crate::ledger::DEFAULT_COOLDOWN_MS;

    const HOUR: i64 = 60 * 60 * 1000;

    fn service() -> VoteService {
        let db = Arc::new(BenchDb::open_in_memory().unwrap());
        db.with_tx(|tx| {
            for id in ["s1", "s2"] {
                insert_submission(tx, &NewSubmission {
                    id: id.into(),
                    model: "model-x".into(),
                    claimed_name: "Example".into(),
                    claimed_entity_id: 7,
                    description: String::new(),
                    media: "<svg/>".into(),
                    is_flagged: false,
                    flag_reason: None,
                    created_at: 0,
                })?;
                aggregates::on_submission_created(tx, id, "model-x", 7, false, 0)?;
            }
            Ok(())
        })
        .unwrap();

        let limits = RateLimitsConfig {
            cast_vote: crate::config::LimitPolicy::TokenBucket { rate: 1000, period_secs: 1, capacity: 1000 },
            ..RateLimitsConfig::default()
        };
        VoteService::new(
            db,
            Arc::new(EventBus::new()),
            Arc::new(RateLimiter::new(limits)),
            DEFAULT_COOLDOWN_MS,
            3,
        )
    }

    fn cast(client: &str, submission: &str, polarity: Polarity) -> CastVoteRequest {
        CastVoteRequest {
            client_id: client.into(),
            submission_id: submission.into(),
            kind: VoteKind::Visual,
            polarity,
        }
    }

    #[test]
    fn test_repeat_cast_is_unchanged() {
        let svc = service();
        let first = svc.cast_vote_at(&cast("c", "s1", Polarity::Up), 0).unwrap();
        assert_eq!(first.action, CastAction::Created);

        let second = svc.cast_vote_at(&cast("c", "s1", Polarity::Up), HOUR).unwrap();
        assert_eq!(second.action, CastAction::Unchanged);
        assert!(second.delta.is_zero());

        let row = svc.db.with_conn(|conn| submissions::get_submission(conn, "s1")).unwrap().unwrap();
        assert_eq!(row.upvotes_visual, 1);
    }

    #[test]
    fn test_flip_then_expiry() {
        let svc = service();
        svc.cast_vote_at(&cast("c", "s1", Polarity::Up), 0).unwrap();

        let flip = svc.cast_vote_at(&cast("c", "s1", Polarity::Down), 47 * HOUR).unwrap();
        assert_eq!(flip.action, CastAction::Updated);
        assert_eq!(flip.prior_polarity, Some(Polarity::Up));
        assert_eq!(flip.delta.upvotes_visual, -1);
        assert_eq!(flip.delta.downvotes_visual, 1);

        // Still inside the window measured from the flip at 47h
        let recast = svc.cast_vote_at(&cast("c", "s1", Polarity::Down), 49 * HOUR).unwrap();
        assert_eq!(recast.action, CastAction::Unchanged);

        let fresh = svc.cast_vote_at(&cast("c", "s1", Polarity::Down), 96 * HOUR).unwrap();
        assert_eq!(fresh.action, CastAction::Created);

        let row = svc.db.with_conn(|conn| submissions::get_submission(conn, "s1")).unwrap().unwrap();
        assert_eq!(row.upvotes_visual, 0);
        assert_eq!(row.downvotes_visual, 2);
    }

    #[test]
    fn test_cast_on_missing_submission_leaves_no_ledger_row() {
        let svc = service();
        let err = svc.cast_vote_at(&cast("c", "ghost", Polarity::Up), 0).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(svc.db.stats().unwrap().ledger_rows, 0);
    }

    #[test]
    fn test_remove_only_while_active() {
        let svc = service();
        let remove = RemoveVoteRequest { client_id: "c".into(), submission_id: "s1".into(), kind: VoteKind::Visual };

        svc.cast_vote_at(&cast("c", "s1", Polarity::Up), 0).unwrap();
        let removed = svc.remove_vote_at(&remove, HOUR).unwrap();
        assert!(removed.removed);
        assert_eq!(removed.prior_polarity, Some(Polarity::Up));

        svc.cast_vote_at(&cast("c", "s1", Polarity::Up), 2 * HOUR).unwrap();
        let late = svc.remove_vote_at(&remove, 60 * HOUR).unwrap();
        assert!(!late.removed);

        let row = svc.db.with_conn(|conn| submissions::get_submission(conn, "s1")).unwrap().unwrap();
        assert_eq!(row.upvotes_visual, 1);

        let platform = svc.db.with_conn(stats::load_platform).unwrap().unwrap();
        assert_eq!(platform.total_votes, 1);
    }

    #[test]
    fn test_batch_reports_partial_failure() {
        let svc = service();
        let request = BatchVoteRequest {
            client_id: "c".into(),
            kind: VoteKind::Factual,
            votes: vec![
                BatchVoteItem { submission_id: "s1".into(), polarity: Polarity::Up },
                BatchVoteItem { submission_id: "ghost".into(), polarity: Polarity::Up },
                BatchVoteItem { submission_id: "s2".into(), polarity: Polarity::Down },
            ],
        };

        let result = svc.cast_votes_batch_at(&request, 0).unwrap();
        assert_eq!(result.processed, 3);
        assert_eq!(result.created, 2);
        assert_eq!(result.failed, 1);
        assert!(result.items[1].error.is_some());
        assert_eq!(result.items[2].outcome.as_ref().map(|o| o.action), Some(CastAction::Created));
    }

    #[test]
    fn test_batch_size_limit() {
        let svc = service();
        let request = BatchVoteRequest {
            client_id: "c".into(),
            kind: VoteKind::Visual,
            votes: (0..4)
                .map(|_| BatchVoteItem { submission_id: "s1".into(), polarity: Polarity::Up })
                .collect(),
        };
        assert!(matches!(svc.cast_votes_batch_at(&request, 0), Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_client_votes_reports_active_only() {
        let svc = service();
        svc.cast_vote_at(&cast("c", "s1", Polarity::Up), 0).unwrap();
        svc.cast_vote_at(
            &CastVoteRequest { kind: VoteKind::Factual, ..cast("c", "s2", Polarity::Down) },
            10 * HOUR,
        )
        .unwrap();

        let ids = vec!["s1".to_string(), "s2".to_string()];
        let views = svc.client_votes_at("c", &ids, 50 * HOUR).unwrap();
        assert_eq!(views[0], ClientVote { submission_id: "s1".into(), visual: None, factual: None });
        assert_eq!(views[1].factual, Some(Polarity::Down));

        assert_eq!(svc.client_voted_ids("c").unwrap(), vec!["s1"]);
    }

    #[test]
    fn test_blank_client_rejected() {
        let svc = service();
        assert!(matches!(
            svc.cast_vote_at(&cast(" ", "s1", Polarity::Up), 0),
            Err(StorageError::Validation(_))
        ));
    }
}
