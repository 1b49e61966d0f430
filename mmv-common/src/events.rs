//! Batch verification events
//!
//! The batch coordinator is the only publisher. Observers (progress UIs,
//! log shippers, tests) subscribe to the [`EventBus`]; publishing never
//! blocks and never fails the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while a verification batch runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerifyEvent {
    /// Batch accepted and work about to start
    BatchStarted {
        batch_id: String,
        total: usize,
        /// Records skipped because a loaded checkpoint lists them
        resumed_skipped: usize,
        timestamp: DateTime<Utc>,
    },

    /// At least one source returned usable data for the record
    RecordFetched {
        batch_id: String,
        record_id: String,
        sources_ok: usize,
        sources_absent: usize,
    },

    /// Zero sources returned usable data
    RecordUnverifiable {
        batch_id: String,
        record_id: String,
        reason: String,
    },

    /// Progress after a record's fetch set completed
    ProgressUpdated {
        batch_id: String,
        total: usize,
        completed: usize,
        failed: usize,
        skipped: usize,
    },

    /// Cooperative cancellation observed; checkpoint written
    BatchCancelled {
        batch_id: String,
        completed: usize,
        remaining: usize,
        timestamp: DateTime<Utc>,
    },

    /// All records processed; checkpoint discarded
    BatchCompleted {
        batch_id: String,
        completed: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl VerifyEvent {
    /// Batch this event belongs to
    pub fn batch_id(&self) -> &str {
        match self {
            VerifyEvent::BatchStarted { batch_id, .. }
            | VerifyEvent::RecordFetched { batch_id, .. }
            | VerifyEvent::RecordUnverifiable { batch_id, .. }
            | VerifyEvent::ProgressUpdated { batch_id, .. }
            | VerifyEvent::BatchCancelled { batch_id, .. }
            | VerifyEvent::BatchCompleted { batch_id, .. } => batch_id,
        }
    }
}

/// Broadcast bus for [`VerifyEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VerifyEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<VerifyEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: VerifyEvent,
    ) -> Result<usize, broadcast::error::SendError<VerifyEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: VerifyEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
