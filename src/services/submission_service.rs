//! Submission lifecycle
//!
//! `received -> validated -> (flagged | clean) -> persisted`. A claim that
//! fails the hallucination check is still published, labelled with the
//! reason. Malformed input is rejected before the lifecycle starts.

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregates;
use crate::db::{self, api_keys, submissions, votes, BenchDb, NewSubmission, SubmissionQuery, SubmissionRow};
use crate::error::StorageError;
use crate::ledger::VoteKind;
use crate::validator;

use super::events::{BenchEvent, EventBus};

const MAX_RANDOM_WINDOW: usize = 150;
const RANDOM_WINDOW_SLACK: usize = 20;

/// Submission payload from a model
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitInput {
    pub model: String,
    pub claimed_name: String,
    pub claimed_entity_id: i64,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "svg")]
    pub media: String,
}

/// Result returned to the submitting model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub submission_id: String,
    pub is_flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_reason: Option<String>,
}

/// Submission lifecycle and read paths
pub struct SubmissionService {
    db: Arc<BenchDb>,
    events: Arc<EventBus>,
}

impl SubmissionService {
    pub fn new(db: Arc<BenchDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a submission
    pub fn create(&self, input: SubmitInput) -> Result<SubmitResult, StorageError> {
        self.create_at(input, db::current_timestamp_ms())
    }

    pub fn create_at(&self, input: SubmitInput, now: i64) -> Result<SubmitResult, StorageError> {
        let input = normalize_input(input)?;
        let result = self.db.with_tx(|tx| persist(tx, &input, now))?;
        self.announce(&input.model, &result);
        Ok(result)
    }

    /// Create a submission on behalf of the model bound to `api_key`
    pub fn create_with_key(&self, api_key: &str, input: SubmitInput) -> Result<SubmitResult, StorageError> {
        self.create_with_key_at(api_key, input, db::current_timestamp_ms())
    }

    pub fn create_with_key_at(&self, api_key: &str, input: SubmitInput, now: i64) -> Result<SubmitResult, StorageError> {
        let input = normalize_input(input)?;
        let result = self.db.with_tx(|tx| {
            let key = api_keys::resolve_key(tx, api_key, now)?
                .ok_or_else(|| StorageError::Forbidden("invalid or expired API key".into()))?;
            if key.model != input.model {
                return Err(StorageError::Validation(format!(
                    "model '{}' does not match the API key's model '{}'",
                    input.model, key.model
                )));
            }
            persist(tx, &input, now)
        })?;
        self.announce(&input.model, &result);
        Ok(result)
    }

    fn announce(&self, model: &str, result: &SubmitResult) {
        info!(
            submission_id = %result.submission_id,
            model = %model,
            flagged = result.is_flagged,
            "Submission recorded"
        );
        self.events.emit(BenchEvent::SubmissionCreated {
            id: result.submission_id.clone(),
            model: model.to_string(),
            flagged: result.is_flagged,
        });
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Option<SubmissionRow>, StorageError> {
        self.db.with_conn(|conn| submissions::get_submission(conn, id))
    }

    pub fn list(&self, query: &SubmissionQuery) -> Result<Vec<SubmissionRow>, StorageError> {
        self.db.with_conn(|conn| submissions::list_submissions(conn, query))
    }

    pub fn recent(&self, limit: u32) -> Result<Vec<SubmissionRow>, StorageError> {
        self.db.with_conn(|conn| submissions::list_window(conn, true, limit))
    }

    pub fn by_entity(&self, entity_id: i64) -> Result<Vec<SubmissionRow>, StorageError> {
        self.db.with_conn(|conn| submissions::list_by_entity(conn, entity_id))
    }

    pub fn by_model(&self, model: &str, limit: u32) -> Result<Vec<SubmissionRow>, StorageError> {
        self.list(&SubmissionQuery {
            model: Some(model.to_string()),
            limit,
            ..Default::default()
        })
    }

    /// Submissions ranked by visual net score
    pub fn leaderboard(&self, model: Option<&str>, limit: u32) -> Result<Vec<SubmissionRow>, StorageError> {
        self.db.with_conn(|conn| submissions::list_ranked_visual(conn, model, limit))
    }

    /// Case-insensitive substring search on claimed names; blank text matches nothing
    pub fn search(&self, text: &str, model: Option<&str>, limit: u32) -> Result<Vec<SubmissionRow>, StorageError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| submissions::search(conn, text, model, limit))
    }

    /// Random sample of unflagged submissions the client has not voted on
    pub fn random_unvoted(
        &self,
        client_id: Option<&str>,
        exclude: &[String],
        limit: u32,
    ) -> Result<Vec<SubmissionRow>, StorageError> {
        self.random_unvoted_at(client_id, exclude, limit, db::current_timestamp_ms())
    }

    /// The sample is stable within one wall-clock minute
    pub fn random_unvoted_at(
        &self,
        client_id: Option<&str>,
        exclude: &[String],
        limit: u32,
        now: i64,
    ) -> Result<Vec<SubmissionRow>, StorageError> {
        let minute_seed = (now / 60_000) as u64;
        let window = (limit as usize + exclude.len() + RANDOM_WINDOW_SLACK).min(MAX_RANDOM_WINDOW);
        let newest_first = minute_seed % 2 == 0;

        let (candidates, voted) = self.db.with_conn(|conn| {
            let candidates = submissions::list_window(conn, newest_first, window as u32)?;
            let voted = match client_id {
                Some(client_id) => voted_ids(conn, client_id)?,
                None => HashSet::new(),
            };
            Ok((candidates, voted))
        })?;

        let excluded: HashSet<&str> = exclude.iter().map(String::as_str).collect();
        let mut pool: Vec<SubmissionRow> = candidates
            .into_iter()
            .filter(|s| !s.is_flagged && !excluded.contains(s.id.as_str()) && !voted.contains(&s.id))
            .collect();

        let mut rng = StdRng::seed_from_u64(minute_seed);
        pool.shuffle(&mut rng);
        pool.truncate(limit as usize);

        debug!(window, returned = pool.len(), "Sampled unvoted submissions");
        Ok(pool)
    }
}

fn voted_ids(conn: &Connection, client_id: &str) -> Result<HashSet<String>, StorageError> {
    let mut ids = HashSet::new();
    for kind in VoteKind::ALL {
        ids.extend(votes::voted_submission_ids(conn, client_id, kind)?);
    }
    Ok(ids)
}

/// Reject malformed input; trims text fields
fn normalize_input(input: SubmitInput) -> Result<SubmitInput, StorageError> {
    let model = input.model.trim().to_string();
    if model.is_empty() {
        return Err(StorageError::Validation("model is required".into()));
    }

    let claimed_name = input.claimed_name.trim().to_string();
    if claimed_name.is_empty() {
        return Err(StorageError::Validation("claimedName is required".into()));
    }

    if input.claimed_entity_id < 1 {
        return Err(StorageError::Validation("claimedEntityId must be >= 1".into()));
    }

    let media = input.media.trim().to_string();
    if media.is_empty() {
        return Err(StorageError::Validation("media is required".into()));
    }
    if !media.to_ascii_lowercase().contains("<svg") {
        return Err(StorageError::Validation("media must contain an <svg> element".into()));
    }

    Ok(SubmitInput {
        model,
        claimed_name,
        claimed_entity_id: input.claimed_entity_id,
        description: input.description.trim().to_string(),
        media,
    })
}

/// Validate, persist and account for one submission inside the caller's transaction
fn persist(conn: &Connection, input: &SubmitInput, now: i64) -> Result<SubmitResult, StorageError> {
    let verdict = validator::validate(conn, input.claimed_entity_id, &input.claimed_name)?;
    let id = uuid::Uuid::new_v4().to_string();

    submissions::insert_submission(conn, &NewSubmission {
        id: id.clone(),
        model: input.model.clone(),
        claimed_name: input.claimed_name.clone(),
        claimed_entity_id: input.claimed_entity_id,
        description: input.description.clone(),
        media: input.media.clone(),
        is_flagged: !verdict.valid,
        flag_reason: verdict.reason.clone(),
        created_at: now,
    })?;

    aggregates::on_submission_created(conn, &id, &input.model, input.claimed_entity_id, !verdict.valid, now)?;

    Ok(SubmitResult {
        submission_id: id,
        is_flagged: !verdict.valid,
        flag_reason: verdict.reason,
    })
}
