//! Domain event system: decoupled communication between the turn pipeline
//! and whoever wants to observe it.
//!
//! Events are published when something interesting happens during a turn.
//! Subscribers react without the pipeline knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::stream::StreamUsage;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn was accepted and gathering started
    TurnStarted {
        session_id: Option<String>,
        provider: String,
        model: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call finished (successfully or with in-band error content)
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The assistant message was persisted as completed
    TurnCompleted {
        session_id: Option<String>,
        message_id: String,
        usage: StreamUsage,
        tool_rounds: usize,
        timestamp: DateTime<Utc>,
    },

    /// The turn ended in error (including caller cancellation)
    TurnFailed {
        session_id: Option<String>,
        kind: ErrorKind,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A post-processing job finished
    PostProcessingCompleted {
        session_id: String,
        title_generated: bool,
        memories_extracted: usize,
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

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "web_search".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted {
                tool_name, success, ..
            } => {
                assert_eq!(tool_name, "web_search");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TurnFailed {
            session_id: None,
            kind: ErrorKind::Internal,
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
