//! Hallucination validator
//!
//! Compares a claimed (entity id, name) pair against the reference table.
//! Failing validation never rejects a submission; the result only decides
//! whether it is published with a flag.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::reference::{self, name_key, ReferenceEntry};
use crate::error::StorageError;

pub const REASON_INVALID_ID: &str = "invalid id";

/// Outcome of validating one claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()) }
    }
}

/// Source of reference entries by id
pub trait ReferenceLookup {
    fn lookup(&self, id: i64) -> Result<Option<ReferenceEntry>, StorageError>;
}

impl ReferenceLookup for Connection {
    fn lookup(&self, id: i64) -> Result<Option<ReferenceEntry>, StorageError> {
        reference::get_entry(self, id)
    }
}

/// Check a claimed name against the entry found for its id
pub fn check(entry: Option<&ReferenceEntry>, claimed_name: &str) -> Validation {
    match entry {
        None => Validation::failed(REASON_INVALID_ID),
        Some(entry) if name_key(&entry.name) == name_key(claimed_name) => Validation::ok(),
        Some(entry) => Validation::failed(format!("name mismatch, expected {}", entry.name)),
    }
}

/// Validate a claim against a reference source
pub fn validate<L>(lookup: &L, claimed_entity_id: i64, claimed_name: &str) -> Result<Validation, StorageError>
where
    L: ReferenceLookup + ?Sized,
{
    let entry = lookup.lookup(claimed_entity_id)?;
    Ok(check(entry.as_ref(), claimed_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapLookup(HashMap<i64, ReferenceEntry>);

    impl ReferenceLookup for MapLookup {
        fn lookup(&self, id: i64) -> Result<Option<ReferenceEntry>, StorageError> {
            Ok(self.0.get(&id).cloned())
        }
    }

    fn lookup() -> MapLookup {
        MapLookup(HashMap::from([(7, ReferenceEntry::new(7, "Example"))]))
    }

    #[test]
    fn test_case_and_whitespace_insensitive_match() {
        assert_eq!(validate(&lookup(), 7, "example").unwrap(), Validation::ok());
        assert_eq!(validate(&lookup(), 7, "  EXAMPLE\t").unwrap(), Validation::ok());
    }

    #[test]
    fn test_name_mismatch() {
        let v = validate(&lookup(), 7, "Wrong").unwrap();
        assert!(!v.valid);
        assert_eq!(v.reason.as_deref(), Some("name mismatch, expected Example"));
    }

    #[test]
    fn test_invalid_id() {
        let v = validate(&lookup(), 9999, "Anything").unwrap();
        assert_eq!(v, Validation::failed("invalid id"));
    }

    #[test]
    fn test_validate_against_database() {
        let db = crate::db::BenchDb::open_in_memory().unwrap();
        db.with_tx(|tx| reference::seed_if_absent(tx, &[ReferenceEntry::new(7, "Example")]))
            .unwrap();

        let v = db.with_conn(|conn| validate(conn, 7, "example")).unwrap();
        assert!(v.valid);
    }
}
