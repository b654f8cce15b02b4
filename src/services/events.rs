//! Event system for benchmark operations
//!
//! Services emit an event after each committed write. Listeners are used for
//! audit logging and could drive cache invalidation on read replicas.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::ledger::{CastAction, Polarity, VoteKind};

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum BenchEvent {
    SubmissionCreated {
        id: String,
        model: String,
        flagged: bool,
    },
    VoteCast {
        submission_id: String,
        kind: VoteKind,
        polarity: Polarity,
        action: CastAction,
    },
    VoteRemoved {
        submission_id: String,
        kind: VoteKind,
    },
    ReferenceSeeded {
        inserted: u64,
        skipped: u64,
    },
    ExpiredVotesSwept {
        deleted: u64,
        has_more: bool,
    },
    AggregatesRecomputed {
        total_submissions: i64,
        models: usize,
    },
    SubmissionsReflagged {
        scanned: u64,
        flagged: u64,
    },
    ApiKeyCreated {
        model: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &BenchEvent);
}

/// Event bus for broadcasting events
pub struct EventBus {
    sender: broadcast::Sender<BenchEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: BenchEvent) {
        trace!(event = ?event, "Emitting bench event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BenchEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &BenchEvent) {
        match event {
            BenchEvent::SubmissionCreated { id, model, flagged } => {
                debug!(submission_id = %id, model = %model, flagged, "Submission created");
            }
            BenchEvent::ReferenceSeeded { inserted, skipped } => {
                debug!(inserted, skipped, "Reference entries seeded");
            }
            BenchEvent::ExpiredVotesSwept { deleted, has_more } => {
                debug!(deleted, has_more, "Expired votes swept");
            }
            BenchEvent::AggregatesRecomputed { total_submissions, models } => {
                debug!(total_submissions, models, "Aggregates recomputed");
            }
            BenchEvent::SubmissionsReflagged { scanned, flagged } => {
                debug!(scanned, flagged, "Submissions reflagged");
            }
            _ => {
                trace!(event = ?event, "Bench event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(BenchEvent::VoteCast {
            submission_id: "s1".into(),
            kind: VoteKind::Visual,
            polarity: Polarity::Up,
            action: CastAction::Created,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            BenchEvent::VoteCast { submission_id, action, .. } => {
                assert_eq!(submission_id, "s1");
                assert_eq!(action, CastAction::Created);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        bus.emit(BenchEvent::VoteRemoved {
            submission_id: "s1".into(),
            kind: VoteKind::Factual,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
