//! API key issuance for submitting models

use std::sync::Arc;

use rand::RngCore;
use tracing::info;

use crate::db::api_keys::{self, ApiKeyRow};
use crate::db::{self, BenchDb};
use crate::error::StorageError;

use super::events::{BenchEvent, EventBus};

const KEY_PREFIX: &str = "pk_";
const KEY_BYTES: usize = 24;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub struct ApiKeyService {
    db: Arc<BenchDb>,
    events: Arc<EventBus>,
    default_ttl_days: u32,
}

impl ApiKeyService {
    pub fn new(db: Arc<BenchDb>, events: Arc<EventBus>, default_ttl_days: u32) -> Self {
        Self { db, events, default_ttl_days }
    }

    /// Issue a key bound to `model`
    pub fn create_key(&self, model: &str, ttl_days: Option<u32>) -> Result<ApiKeyRow, StorageError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(StorageError::Validation("model is required".into()));
        }
        let ttl_days = ttl_days.unwrap_or(self.default_ttl_days);
        if ttl_days == 0 {
            return Err(StorageError::Validation("ttlDays must be > 0".into()));
        }

        let now = db::current_timestamp_ms();
        let row = ApiKeyRow {
            key: generate_key(),
            model: model.to_string(),
            is_active: true,
            expires_at: now + ttl_days as i64 * DAY_MS,
            created_at: now,
        };
        self.db.with_tx(|tx| api_keys::insert_key(tx, &row))?;

        info!(model = %row.model, ttl_days, "API key issued");
        self.events.emit(BenchEvent::ApiKeyCreated { model: row.model.clone() });
        Ok(row)
    }

    /// Model bound to an active, unexpired key
    pub fn resolve(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = db::current_timestamp_ms();
        let row = self.db.with_conn(|conn| api_keys::resolve_key(conn, key, now))?;
        Ok(row.map(|r| r.model))
    }

    pub fn revoke(&self, key: &str) -> Result<bool, StorageError> {
        self.db.with_tx(|tx| api_keys::deactivate_key(tx, key))
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", KEY_PREFIX, hex::encode(bytes))
}
