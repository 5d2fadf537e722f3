//! In-process event bus
//!
//! Every lifecycle transition is published here as a typed
//! [`ExecutionEvent`], regardless of whether it originated in the queue
//! manager, the webhook ingestor or the timeout sweep. Subscribers
//! (notification fan-out, dashboards, metrics exporters) attach with
//! [`EventBus::subscribe`] and never need to distinguish the origin.

use tms_core::domain::event::ExecutionEvent;
use tokio::sync::broadcast;

/// Broadcast channel for domain events.
///
/// Cloning is cheap; all clones publish into the same channel. Publishing
/// with no subscribers attached is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish one event. Slow subscribers may miss events (broadcast
    /// semantics); orchestration state never depends on delivery.
    pub fn publish(&self, event: ExecutionEvent) {
        tracing::debug!(
            event = event.name(),
            execution_id = %event.execution_id(),
            "Publishing domain event"
        );

        // Err means no active subscribers, which is fine
        let _ = self.tx.send(event);
    }

    /// Attach a new subscriber receiving all events published after this
    /// call.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
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
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let id = Uuid::new_v4();
        bus.publish(ExecutionEvent::Cancelled { execution_id: id });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.execution_id(), id);
        assert_eq!(event.name(), "execution_cancelled");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(16);
        bus.publish(ExecutionEvent::Cancelled {
            execution_id: Uuid::new_v4(),
        });
    }
}
