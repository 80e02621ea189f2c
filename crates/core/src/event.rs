//! Domain event system: decoupled observation of runs.
//!
//! The engine publishes an event at every state transition. Anything that
//! wants to watch runs (a service layer streaming progress, a metrics
//! exporter, a test) subscribes without the engine knowing about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A run entered the Cache Gate
    RunStarted {
        thread_id: String,
        user_scope: String,
        timestamp: DateTime<Utc>,
    },

    /// The cache supplied the answer; the run skips reasoning entirely
    CacheHit {
        thread_id: String,
        score: f32,
        timestamp: DateTime<Utc>,
    },

    /// The reasoning policy answered one REASON step
    ReasoningStep {
        thread_id: String,
        step: u32,
        requested: usize,
        timestamp: DateTime<Utc>,
    },

    /// A capability request was dispatched
    CapabilityDispatched {
        thread_id: String,
        capability: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A bulk observation was distilled before entering context
    ObservationDistilled {
        capability: String,
        raw_chars: usize,
        distilled_chars: usize,
        timestamp: DateTime<Utc>,
    },

    /// A collaborator failed and the run continued without it
    CollaboratorDegraded {
        collaborator: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A run reached DONE
    RunCompleted {
        thread_id: String,
        steps: u32,
        dispatches: usize,
        termination: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::CapabilityDispatched {
            thread_id: "t1".into(),
            capability: "web_search".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::CapabilityDispatched {
                capability, success, ..
            } => {
                assert_eq!(capability, "web_search");
                assert!(success);
            }
            _ => panic!("Expected CapabilityDispatched event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::CollaboratorDegraded {
            collaborator: "knowledge".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
