//! Message Bus for turn lifecycle events
//!
//! Interface layers subscribe here to follow what the orchestrator is doing
//! without holding a reference to it. Channels are bounded; a subscriber that
//! falls behind misses events instead of stalling a turn.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::guardrail::IncidentKind;
use crate::orchestrator::TurnOutcome;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event types that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    /// A turn has been accepted for a session
    TurnStarted,
    /// A turn has produced its final Turn record
    TurnCompleted,
    /// A guardrail stage redacted or blocked content
    IncidentRaised,
    /// A session was closed explicitly or by idle expiry
    SessionClosed,
    /// Subscribe to all event types
    All,
}

/// Events published on the message bus
#[derive(Debug, Clone)]
pub enum Event {
    TurnStarted {
        turn_id: String,
        session_id: String,
        user_id: String,
    },
    TurnCompleted {
        turn_id: String,
        session_id: String,
        outcome: TurnOutcome,
        duration_ms: u64,
    },
    IncidentRaised {
        turn_id: String,
        kind: IncidentKind,
        stage: String,
        severity: String,
    },
    SessionClosed {
        session_id: String,
        user_id: String,
        reason: String,
    },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::TurnStarted { .. } => EventType::TurnStarted,
            Event::TurnCompleted { .. } => EventType::TurnCompleted,
            Event::IncidentRaised { .. } => EventType::IncidentRaised,
            Event::SessionClosed { .. } => EventType::SessionClosed,
        }
    }
}

/// Message bus for pub/sub communication
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    /// Create a new MessageBus
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Publish an event to its type's subscribers and to `All` subscribers
    ///
    /// Full channels drop the event; closed channels are pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Subscriber channel full, dropping {:?}", key);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Number of live subscribers for an event type
    pub async fn subscriber_count(&self, event_type: EventType) -> usize {
        let channels = self.channels.lock().await;
        channels.get(&event_type).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(turn: &str) -> Event {
        Event::TurnStarted {
            turn_id: turn.to_string(),
            session_id: "s1".to_string(),
            user_id: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe(EventType::TurnStarted).await;

        bus.publish(started("t-1")).await;

        match rx.recv().await.unwrap() {
            Event::TurnStarted { turn_id, user_id, .. } => {
                assert_eq!(turn_id, "t-1");
                assert_eq!(user_id, "alice");
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_all_event_type() {
        let bus = MessageBus::new();
        let mut rx_all = bus.subscribe(EventType::All).await;
        let mut rx_closed = bus.subscribe(EventType::SessionClosed).await;

        bus.publish(Event::SessionClosed {
            session_id: "s1".to_string(),
            user_id: "alice".to_string(),
            reason: "closed".to_string(),
        })
        .await;

        assert_eq!(rx_all.recv().await.unwrap().event_type(), EventType::SessionClosed);
        assert_eq!(
            rx_closed.recv().await.unwrap().event_type(),
            EventType::SessionClosed
        );
    }

    #[tokio::test]
    async fn test_full_channel_does_not_block_publisher() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe(EventType::TurnStarted).await;

        for i in 0..CHANNEL_BUFFER_SIZE + 10 {
            bus.publish(started(&format!("t-{}", i))).await;
        }

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, CHANNEL_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let bus = MessageBus::new();
        let rx = bus.subscribe(EventType::TurnStarted).await;
        drop(rx);

        bus.publish(started("t-1")).await;
        assert_eq!(bus.subscriber_count(EventType::TurnStarted).await, 0);
    }
}
