//! Domain events: what happened to sessions, turns, tools and the knowledge base.
//!
//! The UI and logs subscribe; publishers never wait on them. A subscriber that
//! falls behind by more than the bus capacity skips the oldest events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A session was created
    SessionCreated {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A session was renamed
    SessionRenamed {
        session_id: String,
        title: String,
        timestamp: DateTime<Utc>,
    },

    /// A session was deleted from the authoritative store
    SessionDeleted {
        session_id: String,
        chunks_removed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A reasoning turn finished (any terminal state)
    TurnCompleted {
        session_id: String,
        state: String,
        steps: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The knowledge base was queried
    RetrievalPerformed {
        namespace: String,
        hits: usize,
        timestamp: DateTime<Utc>,
    },

    /// A document was chunked, embedded and indexed
    DocumentIngested {
        namespace: String,
        source: String,
        chunks: usize,
        timestamp: DateTime<Utc>,
    },

    /// The local history cache was reconciled against the store
    HistoryReconciled {
        repairs: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The session this event concerns, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::SessionRenamed { session_id, .. }
            | Self::SessionDeleted { session_id, .. }
            | Self::TurnCompleted { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

/// Fan-out of [`DomainEvent`]s over a `tokio::sync::broadcast` channel.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Returns how many subscribers received the event; zero is not an error.
    pub fn publish(&self, event: DomainEvent) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

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

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "calculator".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "calculator");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_session_deletes() {
        let bus = EventBus::new(16);
        let mut ui = bus.subscribe();
        let mut audit = bus.subscribe();

        bus.publish(DomainEvent::SessionDeleted {
            session_id: "s1".into(),
            chunks_removed: 3,
            timestamp: Utc::now(),
        });

        for rx in [&mut ui, &mut audit] {
            let event = rx.recv().await.unwrap();
            assert!(matches!(
                event.as_ref(),
                DomainEvent::SessionDeleted { chunks_removed: 3, .. }
            ));
            assert_eq!(event.session_id(), Some("s1"));
        }
    }

    #[test]
    fn publishing_without_subscribers_reaches_nobody() {
        let bus = EventBus::new(16);
        let reached = bus.publish(DomainEvent::ErrorOccurred {
            context: "turn:s1".into(),
            error_message: "model unavailable".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(reached, 0);
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let event = DomainEvent::HistoryReconciled {
            repairs: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "history_reconciled");
        assert_eq!(event.session_id(), None);
    }
}
