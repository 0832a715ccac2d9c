//! Event types for the LRX pipeline event system
//!
//! Workers and the reconciler publish progress on a broadcast bus; the
//! HTTP status surface and tests subscribe. Emission is fire-and-forget:
//! pipeline correctness never depends on a subscriber being present.

use crate::db::models::DriftReport;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// LRX pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EtlEvent {
    /// A statement was normalized into the relational schema
    StatementNormalized {
        statement_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An event permanently failed and was written to the dead-letter log
    EventDeadLettered {
        event_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A worker finished one queue batch
    BatchProcessed {
        worker_id: usize,
        batch_size: usize,
        normalized: usize,
        dead_lettered: usize,
        requeued: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The reconciler completed a pass over the trailing window
    DriftReportReady { report: DriftReport },

    /// A worker loop exited (shutdown or fatal error)
    WorkerStopped {
        worker_id: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EtlEvent {
    /// Event type name, as carried in the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            EtlEvent::StatementNormalized { .. } => "StatementNormalized",
            EtlEvent::EventDeadLettered { .. } => "EventDeadLettered",
            EtlEvent::BatchProcessed { .. } => "BatchProcessed",
            EtlEvent::DriftReportReady { .. } => "DriftReportReady",
            EtlEvent::WorkerStopped { .. } => "WorkerStopped",
        }
    }
}

/// Broadcast event bus shared by workers, the reconciler and observers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EtlEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EtlEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if no subscriber is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: EtlEvent) -> Result<usize, broadcast::error::SendError<EtlEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    pub fn emit_lossy(&self, event: EtlEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_lossy_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit_lossy(EtlEvent::WorkerStopped {
            worker_id: 0,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let statement_id = Uuid::new_v4();
        bus.emit(EtlEvent::StatementNormalized {
            statement_id,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            EtlEvent::StatementNormalized { statement_id: id, .. } => {
                assert_eq!(id, statement_id);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = EtlEvent::EventDeadLettered {
            event_id: Uuid::new_v4(),
            reason: "missing verb id".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"EventDeadLettered\""));
        assert!(json.contains("missing verb id"));
        assert_eq!(event.event_type(), "EventDeadLettered");
    }
}
