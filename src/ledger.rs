//! Vote ledger state machine
//!
//! Each (client, submission, kind) key owns one vote slot. A slot is
//! `Absent` when no ledger row exists, `Active` while the most recent row was
//! cast within the cooldown window, and `Expired` once that row has aged out.
//! Expiry is never stored; it is derived from `cast_at` at read time.
//!
//! ```text
//!            cast(p)                    cast(!p) [in place]
//! Absent ───────────▶ Active(p) ◀──────────────────────────┐
//!    ▲                  │  │                                │
//!    │ remove           │  └───────────── Active(!p) ───────┘
//!    └──────────────────┘
//!                       │ now - cast_at > cooldown
//!                       ▼
//!                    Expired ──── cast(p) ───▶ new Active(p) row
//! ```
//!
//! The functions here are pure: they decide which ledger write and which
//! counter delta a request produces. The vote service applies both inside a
//! single transaction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Default cooldown window: 48 hours in milliseconds
pub const DEFAULT_COOLDOWN_MS: i64 = 48 * 60 * 60 * 1000;

/// Dimension being voted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Visual,
    Factual,
}

impl VoteKind {
    pub const ALL: [VoteKind; 2] = [VoteKind::Visual, VoteKind::Factual];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Visual => "visual",
            VoteKind::Factual => "factual",
        }
    }
}

impl FromStr for VoteKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visual" => Ok(VoteKind::Visual),
            "factual" => Ok(VoteKind::Factual),
            other => Err(StorageError::Validation(format!("unknown vote kind '{}'", other))),
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Up,
    Down,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Up => "up",
            Polarity::Down => "down",
        }
    }
}

impl FromStr for Polarity {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Polarity::Up),
            "down" => Ok(Polarity::Down),
            other => Err(StorageError::Validation(format!("unknown polarity '{}'", other))),
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed change to the four per-submission vote counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterDelta {
    pub upvotes_visual: i64,
    pub downvotes_visual: i64,
    pub upvotes_factual: i64,
    pub downvotes_factual: i64,
}

impl CounterDelta {
    /// Delta of `amount` on the counter addressed by (kind, polarity)
    pub fn single(kind: VoteKind, polarity: Polarity, amount: i64) -> Self {
        let mut delta = CounterDelta::default();
        *delta.field_mut(kind, polarity) = amount;
        delta
    }

    pub fn field(&self, kind: VoteKind, polarity: Polarity) -> i64 {
        match (kind, polarity) {
            (VoteKind::Visual, Polarity::Up) => self.upvotes_visual,
            (VoteKind::Visual, Polarity::Down) => self.downvotes_visual,
            (VoteKind::Factual, Polarity::Up) => self.upvotes_factual,
            (VoteKind::Factual, Polarity::Down) => self.downvotes_factual,
        }
    }

    pub fn field_mut(&mut self, kind: VoteKind, polarity: Polarity) -> &mut i64 {
        match (kind, polarity) {
            (VoteKind::Visual, Polarity::Up) => &mut self.upvotes_visual,
            (VoteKind::Visual, Polarity::Down) => &mut self.downvotes_visual,
            (VoteKind::Factual, Polarity::Up) => &mut self.upvotes_factual,
            (VoteKind::Factual, Polarity::Down) => &mut self.downvotes_factual,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == CounterDelta::default()
    }

    /// Net change in the number of counted votes
    pub fn total(&self) -> i64 {
        self.upvotes_visual + self.downvotes_visual + self.upvotes_factual + self.downvotes_factual
    }

    pub fn combine(&self, other: &CounterDelta) -> CounterDelta {
        CounterDelta {
            upvotes_visual: self.upvotes_visual + other.upvotes_visual,
            downvotes_visual: self.downvotes_visual + other.downvotes_visual,
            upvotes_factual: self.upvotes_factual + other.upvotes_factual,
            downvotes_factual: self.downvotes_factual + other.downvotes_factual,
        }
    }
}

/// Ledger row as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub client_id: String,
    pub submission_id: String,
    pub kind: VoteKind,
    pub polarity: Polarity,
    /// Last cast time in ms; `None` for legacy rows awaiting backfill
    pub cast_at: Option<i64>,
    pub created_at: i64,
}

/// State of one vote slot at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Absent,
    Active { entry_id: i64, polarity: Polarity },
    Expired { entry_id: i64 },
}

impl SlotState {
    /// Classify the most recent ledger row for a key
    pub fn of(latest: Option<&LedgerEntry>, now: i64, cooldown_ms: i64) -> SlotState {
        match latest {
            None => SlotState::Absent,
            Some(entry) => match entry.cast_at {
                Some(cast_at) if !is_expired(cast_at, now, cooldown_ms) => SlotState::Active {
                    entry_id: entry.id,
                    polarity: entry.polarity,
                },
                // Rows without a cast time predate timestamps and count as aged out
                _ => SlotState::Expired { entry_id: entry.id },
            },
        }
    }

    pub fn active_polarity(&self) -> Option<Polarity> {
        match self {
            SlotState::Active { polarity, .. } => Some(*polarity),
            _ => None,
        }
    }
}

/// `now - cast_at > cooldown`
pub fn is_expired(cast_at: i64, now: i64, cooldown_ms: i64) -> bool {
    now.saturating_sub(cast_at) > cooldown_ms
}

/// Outcome of a cast request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastAction {
    Created,
    Updated,
    Unchanged,
}

/// Ledger mutation a decision requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    None,
    Insert { polarity: Polarity, cast_at: i64 },
    Update { entry_id: i64, polarity: Polarity, cast_at: i64 },
    Delete { entry_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastDecision {
    pub action: CastAction,
    pub prior_polarity: Option<Polarity>,
    pub write: LedgerWrite,
    pub delta: CounterDelta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveDecision {
    pub removed: bool,
    pub prior_polarity: Option<Polarity>,
    pub write: LedgerWrite,
    pub delta: CounterDelta,
}

/// Decide the effect of casting `polarity` on a slot
pub fn decide_cast(state: SlotState, kind: VoteKind, polarity: Polarity, now: i64) -> CastDecision {
    match state {
        SlotState::Active { polarity: current, .. } if current == polarity => CastDecision {
            action: CastAction::Unchanged,
            prior_polarity: Some(current),
            write: LedgerWrite::None,
            delta: CounterDelta::default(),
        },
        SlotState::Active { entry_id, polarity: current } => CastDecision {
            action: CastAction::Updated,
            prior_polarity: Some(current),
            write: LedgerWrite::Update { entry_id, polarity, cast_at: now },
            delta: CounterDelta::single(kind, polarity, 1)
                .combine(&CounterDelta::single(kind, current, -1)),
        },
        // Expired rows keep their counted effect; the new cast is cumulative
        SlotState::Absent | SlotState::Expired { .. } => CastDecision {
            action: CastAction::Created,
            prior_polarity: None,
            write: LedgerWrite::Insert { polarity, cast_at: now },
            delta: CounterDelta::single(kind, polarity, 1),
        },
    }
}

/// Decide the effect of retracting a slot's vote; only active votes can be retracted
pub fn decide_remove(state: SlotState, kind: VoteKind) -> RemoveDecision {
    match state {
        SlotState::Active { entry_id, polarity } => RemoveDecision {
            removed: true,
            prior_polarity: Some(polarity),
            write: LedgerWrite::Delete { entry_id },
            delta: CounterDelta::single(kind, polarity, -1),
        },
        SlotState::Absent | SlotState::Expired { .. } => RemoveDecision {
            removed: false,
            prior_polarity: None,
            write: LedgerWrite::None,
            delta: CounterDelta::default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 60 * 60 * 1000;

    fn entry(polarity: Polarity, cast_at: Option<i64>) -> LedgerEntry {
        LedgerEntry {
            id: 7,
            client_id: "client-a".into(),
            submission_id: "sub-1".into(),
            kind: VoteKind::Visual,
            polarity,
            cast_at,
            created_at: cast_at.unwrap_or(0),
        }
    }

    #[test]
    fn test_slot_state_classification() {
        assert_eq!(SlotState::of(None, 0, DEFAULT_COOLDOWN_MS), SlotState::Absent);

        let e = entry(Polarity::Up, Some(0));
        assert_eq!(
            SlotState::of(Some(&e), 47 * HOUR, DEFAULT_COOLDOWN_MS),
            SlotState::Active { entry_id: 7, polarity: Polarity::Up }
        );
        // Exactly at the boundary the vote is still current
        assert_eq!(
            SlotState::of(Some(&e), 48 * HOUR, DEFAULT_COOLDOWN_MS).active_polarity(),
            Some(Polarity::Up)
        );
        assert_eq!(
            SlotState::of(Some(&e), 48 * HOUR + 1, DEFAULT_COOLDOWN_MS),
            SlotState::Expired { entry_id: 7 }
        );
    }

    #[test]
    fn test_legacy_row_without_cast_time_is_expired() {
        let e = entry(Polarity::Down, None);
        assert_eq!(
            SlotState::of(Some(&e), 1, DEFAULT_COOLDOWN_MS),
            SlotState::Expired { entry_id: 7 }
        );
    }

    #[test]
    fn test_cast_on_absent_creates() {
        let d = decide_cast(SlotState::Absent, VoteKind::Factual, Polarity::Down, 100);
        assert_eq!(d.action, CastAction::Created);
        assert_eq!(d.prior_polarity, None);
        assert_eq!(d.write, LedgerWrite::Insert { polarity: Polarity::Down, cast_at: 100 });
        assert_eq!(d.delta, CounterDelta { downvotes_factual: 1, ..Default::default() });
    }

    #[test]
    fn test_same_polarity_is_unchanged() {
        let state = SlotState::Active { entry_id: 3, polarity: Polarity::Up };
        let d = decide_cast(state, VoteKind::Visual, Polarity::Up, 5);
        assert_eq!(d.action, CastAction::Unchanged);
        assert_eq!(d.prior_polarity, Some(Polarity::Up));
        assert_eq!(d.write, LedgerWrite::None);
        assert!(d.delta.is_zero());
    }

    #[test]
    fn test_flip_within_cooldown_updates_in_place() {
        let e = entry(Polarity::Up, Some(0));
        let state = SlotState::of(Some(&e), 47 * HOUR, DEFAULT_COOLDOWN_MS);
        let d = decide_cast(state, VoteKind::Visual, Polarity::Down, 47 * HOUR);

        assert_eq!(d.action, CastAction::Updated);
        assert_eq!(d.prior_polarity, Some(Polarity::Up));
        assert_eq!(
            d.write,
            LedgerWrite::Update { entry_id: 7, polarity: Polarity::Down, cast_at: 47 * HOUR }
        );
        assert_eq!(d.delta.upvotes_visual, -1);
        assert_eq!(d.delta.downvotes_visual, 1);
        assert_eq!(d.delta.total(), 0);
    }

    #[test]
    fn test_cast_after_expiry_creates_fresh_row() {
        // Down was (re)cast at 47h; at 96h it has aged out
        let e = entry(Polarity::Down, Some(47 * HOUR));
        let state = SlotState::of(Some(&e), 96 * HOUR, DEFAULT_COOLDOWN_MS);
        let d = decide_cast(state, VoteKind::Visual, Polarity::Down, 96 * HOUR);

        assert_eq!(d.action, CastAction::Created);
        assert_eq!(d.delta, CounterDelta { downvotes_visual: 1, ..Default::default() });
        assert_eq!(d.delta.upvotes_visual, 0);
    }

    #[test]
    fn test_remove_only_active() {
        let active = SlotState::Active { entry_id: 9, polarity: Polarity::Down };
        let d = decide_remove(active, VoteKind::Factual);
        assert!(d.removed);
        assert_eq!(d.write, LedgerWrite::Delete { entry_id: 9 });
        assert_eq!(d.delta.downvotes_factual, -1);

        let d = decide_remove(SlotState::Expired { entry_id: 9 }, VoteKind::Factual);
        assert!(!d.removed);
        assert_eq!(d.write, LedgerWrite::None);
        assert!(d.delta.is_zero());

        assert!(!decide_remove(SlotState::Absent, VoteKind::Visual).removed);
    }

    #[test]
    fn test_parse_kind_and_polarity() {
        assert_eq!("visual".parse::<VoteKind>().unwrap(), VoteKind::Visual);
        assert_eq!("down".parse::<Polarity>().unwrap(), Polarity::Down);
        assert!(matches!("image".parse::<VoteKind>(), Err(StorageError::Validation(_))));
    }
}
