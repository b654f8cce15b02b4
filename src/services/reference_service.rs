//! Reference data service
//!
//! Bulk loading of (id, name) pairs. Seeding and the platform's entity total
//! move together in one transaction.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::aggregates;
use crate::db::reference::{self, ReferenceEntry, SeedResult};
use crate::db::{self, BenchDb};
use crate::error::StorageError;

use super::events::{BenchEvent, EventBus};

pub struct ReferenceService {
    db: Arc<BenchDb>,
    events: Arc<EventBus>,
}

impl ReferenceService {
    pub fn new(db: Arc<BenchDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Insert entries whose id is not present yet
    pub fn seed_if_absent(&self, entries: &[ReferenceEntry]) -> Result<SeedResult, StorageError> {
        let now = db::current_timestamp_ms();
        let result = self.db.with_tx(|tx| {
            let result = reference::seed_if_absent(tx, entries)?;
            aggregates::on_reference_seeded(tx, result.inserted, now)?;
            Ok(result)
        })?;

        info!(inserted = result.inserted, skipped = result.skipped, "Reference data seeded");
        self.events.emit(BenchEvent::ReferenceSeeded {
            inserted: result.inserted,
            skipped: result.skipped,
        });
        Ok(result)
    }

    /// Seed from a JSON file holding `[{"id": 1, "name": "..."}, ...]`
    pub fn seed_from_file(&self, path: &Path) -> Result<SeedResult, StorageError> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<ReferenceEntry> = serde_json::from_str(&content)?;
        info!(path = %path.display(), entries = entries.len(), "Loading reference seed file");
        self.seed_if_absent(&entries)
    }

    pub fn get(&self, id: i64) -> Result<Option<ReferenceEntry>, StorageError> {
        self.db.with_conn(|conn| reference::get_entry(conn, id))
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<ReferenceEntry>, StorageError> {
        self.db.with_conn(|conn| reference::find_by_name(conn, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::stats;

    #[test]
    fn test_seed_tracks_total_entities() {
        let db = Arc::new(BenchDb::open_in_memory().unwrap());
        let svc = ReferenceService::new(db.clone(), Arc::new(EventBus::new()));

        svc.seed_if_absent(&[ReferenceEntry::new(1, "Alpha"), ReferenceEntry::new(2, "Beta")])
            .unwrap();
        let again = svc
            .seed_if_absent(&[ReferenceEntry::new(2, "Beta"), ReferenceEntry::new(3, "Gamma")])
            .unwrap();
        assert_eq!(again, SeedResult { inserted: 1, skipped: 1 });

        let platform = db.with_conn(stats::load_platform).unwrap().unwrap();
        assert_eq!(platform.total_entities, 3);
    }

    #[test]
    fn test_seed_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, r#"[{"id": 7, "name": "Example"}]"#).unwrap();

        let db = Arc::new(BenchDb::open_in_memory().unwrap());
        let svc = ReferenceService::new(db, Arc::new(EventBus::new()));
        let result = svc.seed_from_file(&path).unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(svc.find_by_name("example").unwrap().map(|e| e.id), Some(7));
    }

    #[test]
    fn test_invalid_entry_rolls_back_batch() {
        let db = Arc::new(BenchDb::open_in_memory().unwrap());
        let svc = ReferenceService::new(db.clone(), Arc::new(EventBus::new()));
        let err = svc
            .seed_if_absent(&[ReferenceEntry::new(1, "Alpha"), ReferenceEntry::new(2, " ")])
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert!(svc.get(1).unwrap().is_none());
    }
}
