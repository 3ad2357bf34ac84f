//! Event Bus - broadcast fan-out of limiter events

use tokio::sync::broadcast;
use tracing::debug;

use super::types::LimiterEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast bus for one limiter's events
///
/// Cloning shares the underlying channel. Emitting with no subscribers is
/// fine; slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LimiterEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LimiterEvent) {
        debug!(event_type = event.event_type(), job_id = event.job_id(), "EventBus::emit");
        // No subscribers is OK
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::LimiterState;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_event_bus_subscribe() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(LimiterEvent::Status {
            state: LimiterState::Running,
        });
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();

        bus.emit(LimiterEvent::Dropped {
            job_id: "job-1".to_string(),
            reason: "overflow".to_string(),
        });

        assert_eq!(rx1.recv().await.unwrap().job_id(), Some("job-1"));
        assert_eq!(rx2.recv().await.unwrap().job_id(), Some("job-1"));
        assert!(matches!(rx1.try_recv(), Err(TryRecvError::Empty)));
    }
}
