//! Per-client admission control for vote endpoints
//!
//! Checked before a vote transaction begins. Rejections surface as
//! [`StorageError::RateLimitExceeded`] carrying how long the caller should
//! wait.

use dashmap::DashMap;
use std::fmt;
use tracing::warn;

use crate::config::{LimitPolicy, RateLimitsConfig};
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CastVote,
    CastVotesBatch,
    RemoveVote,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CastVote => "cast_vote",
            Operation::CastVotesBatch => "cast_votes_batch",
            Operation::RemoveVote => "remove_vote",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
enum Bucket {
    Tokens { tokens: f64, refilled_at: i64 },
    Window { started_at: i64, count: u32 },
}

#[derive(Debug, Clone)]
struct BucketState {
    bucket: Bucket,
    last_seen: i64,
}

/// Token buckets and fixed windows keyed by (operation, client)
pub struct RateLimiter {
    limits: RateLimitsConfig,
    buckets: DashMap<(Operation, String), BucketState>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitsConfig) -> Self {
        Self {
            limits,
            buckets: DashMap::new(),
        }
    }

    fn policy(&self, op: Operation) -> LimitPolicy {
        match op {
            Operation::CastVote => self.limits.cast_vote,
            Operation::CastVotesBatch => self.limits.cast_votes_batch,
            Operation::RemoveVote => self.limits.remove_vote,
        }
    }

    /// Admit one request at the current time
    pub fn check(&self, op: Operation, client_id: &str) -> Result<(), StorageError> {
        self.check_at(op, client_id, crate::db::current_timestamp_ms())
    }

    /// Admit one request at `now` (ms), recording it if admitted
    pub fn check_at(&self, op: Operation, client_id: &str, now: i64) -> Result<(), StorageError> {
        let policy = self.policy(op);
        let mut state = self
            .buckets
            .entry((op, client_id.to_string()))
            .or_insert_with(|| BucketState { bucket: fresh_bucket(policy, now), last_seen: now });
        state.last_seen = now;

        let verdict = match (&mut state.bucket, policy) {
            (Bucket::Tokens { tokens, refilled_at }, LimitPolicy::TokenBucket { rate, period_secs, capacity }) => {
                let per_ms = rate as f64 / (period_secs as f64 * 1000.0);
                let elapsed = (now - *refilled_at).max(0) as f64;
                *tokens = (*tokens + elapsed * per_ms).min(capacity as f64);
                *refilled_at = now;

                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    Ok(())
                } else {
                    Err(((1.0 - *tokens) / per_ms).ceil() as u64)
                }
            }
            (Bucket::Window { started_at, count }, LimitPolicy::FixedWindow { rate, period_secs }) => {
                let period_ms = (period_secs * 1000) as i64;
                let window = now - now.rem_euclid(period_ms);
                if window != *started_at {
                    *started_at = window;
                    *count = 0;
                }

                if *count < rate {
                    *count += 1;
                    Ok(())
                } else {
                    Err((window + period_ms - now) as u64)
                }
            }
            // Buckets are always created from their operation's policy
            _ => Ok(()),
        };

        verdict.map_err(|retry_after_ms| {
            warn!(operation = %op, client_id = %client_id, retry_after_ms, "Rate limit exceeded");
            StorageError::RateLimitExceeded {
                operation: op.to_string(),
                retry_after_ms,
            }
        })
    }

    /// Drop buckets untouched for longer than `idle_ms`
    pub fn cleanup(&self, now: i64, idle_ms: i64) {
        self.buckets.retain(|_, state| now - state.last_seen <= idle_ms);
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

fn fresh_bucket(policy: LimitPolicy, now: i64) -> Bucket {
    match policy {
        LimitPolicy::TokenBucket { capacity, .. } => Bucket::Tokens { tokens: capacity as f64, refilled_at: now },
        LimitPolicy::FixedWindow { period_secs, .. } => {
            let period_ms = (period_secs * 1000) as i64;
            Bucket::Window { started_at: now - now.rem_euclid(period_ms), count: 0 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_bursts_then_refills() {
        // 20/min with capacity 3: one token every 3s
        let limiter = RateLimiter::new(RateLimitsConfig::default());
        for _ in 0..3 {
            limiter.check_at(Operation::CastVote, "c", 0).unwrap();
        }

        match limiter.check_at(Operation::CastVote, "c", 0) {
            Err(StorageError::RateLimitExceeded { retry_after_ms, .. }) => assert_eq!(retry_after_ms, 3000),
            other => panic!("expected rate limit, got {:?}", other),
        }

        // Other clients and operations are independent
        limiter.check_at(Operation::CastVote, "d", 0).unwrap();
        limiter.check_at(Operation::RemoveVote, "c", 0).unwrap();

        limiter.check_at(Operation::CastVote, "c", 3000).unwrap();
        assert!(limiter.check_at(Operation::CastVote, "c", 3000).is_err());
    }

    #[test]
    fn test_fixed_window_resets_on_boundary() {
        let limiter = RateLimiter::new(RateLimitsConfig::default());
        for _ in 0..10 {
            limiter.check_at(Operation::CastVotesBatch, "c", 1_000).unwrap();
        }

        match limiter.check_at(Operation::CastVotesBatch, "c", 45_000) {
            Err(StorageError::RateLimitExceeded { retry_after_ms, operation }) => {
                assert_eq!(retry_after_ms, 15_000);
                assert_eq!(operation, "cast_votes_batch");
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        limiter.check_at(Operation::CastVotesBatch, "c", 60_000).unwrap();
    }

    #[test]
    fn test_cleanup_drops_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitsConfig::default());
        limiter.check_at(Operation::CastVote, "old", 0).unwrap();
        limiter.check_at(Operation::CastVote, "new", 100_000).unwrap();

        limiter.cleanup(100_000, 60_000);
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
