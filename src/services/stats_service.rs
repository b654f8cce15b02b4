//! Statistics read service

use std::sync::Arc;

use crate::aggregates::{self, PlatformStats};
use crate::db::{stats, BenchDb, DbStats};
use crate::error::StorageError;

pub struct StatsService {
    db: Arc<BenchDb>,
}

impl StatsService {
    pub fn new(db: Arc<BenchDb>) -> Self {
        Self { db }
    }

    /// Platform aggregate, its flag rate and every model's derived rates
    pub fn platform_stats(&self) -> Result<PlatformStats, StorageError> {
        self.db.with_conn(aggregates::platform_stats)
    }

    /// Model names with at least one aggregate row, sorted
    pub fn models(&self) -> Result<Vec<String>, StorageError> {
        let rows = self.db.with_conn(stats::list_models)?;
        Ok(rows.into_iter().map(|m| m.model).collect())
    }

    /// Table row counts for health reporting
    pub fn db_stats(&self) -> Result<DbStats, StorageError> {
        self.db.stats()
    }
}
