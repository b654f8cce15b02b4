//! Service layer for crowdbench
//!
//! Services sit between HTTP handlers and repositories. Each one owns the
//! transaction boundary for its operations, emits events after commit, and
//! validates input before touching the store.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (lifecycle, voting, maintenance)
//!     ↓
//! Engines (ledger, counters, aggregates, validator)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod submission_service;
pub mod vote_service;
pub mod stats_service;
pub mod reference_service;
pub mod maintenance_service;
pub mod api_key_service;

// Re-exports
pub use response::*;
pub use events::{spawn_logging_listener, BenchEvent, EventBus, EventListener};
pub use submission_service::{SubmissionService, SubmitInput, SubmitResult};
pub use vote_service::{
    BatchResult, BatchVoteRequest, CastOutcome, CastVoteRequest, RemoveOutcome, RemoveVoteRequest, VoteService,
};
pub use stats_service::StatsService;
pub use reference_service::ReferenceService;
pub use maintenance_service::{BackfillResult, MaintenanceService, ReflagResult, SweepResult};
pub use api_key_service::ApiKeyService;

use std::sync::Arc;

use crate::config::Config;
use crate::db::BenchDb;
use crate::rate_limit::RateLimiter;

/// Service container for dependency injection
///
/// Holds all services with a shared database and event bus.
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub submissions: Arc<SubmissionService>,
    pub votes: Arc<VoteService>,
    pub stats: Arc<StatsService>,
    pub reference: Arc<ReferenceService>,
    pub maintenance: Arc<MaintenanceService>,
    pub api_keys: Arc<ApiKeyService>,
    pub limiter: Arc<RateLimiter>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services over one database
    pub fn new(db: Arc<BenchDb>, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let cooldown_ms = config.cooldown_ms();

        Self {
            submissions: Arc::new(SubmissionService::new(db.clone(), events.clone())),
            votes: Arc::new(VoteService::new(
                db.clone(),
                events.clone(),
                limiter.clone(),
                cooldown_ms,
                config.max_batch_votes,
            )),
            stats: Arc::new(StatsService::new(db.clone())),
            reference: Arc::new(ReferenceService::new(db.clone(), events.clone())),
            maintenance: Arc::new(MaintenanceService::new(db.clone(), events.clone(), cooldown_ms)),
            api_keys: Arc::new(ApiKeyService::new(db, events.clone(), config.api_key_ttl_days)),
            limiter,
            events,
        }
    }
}
