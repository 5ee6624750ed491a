//! Build event broadcaster.
//!
//! Fans build events out over a `tokio::sync::broadcast` channel. The status
//! watcher is the main subscriber; a subscriber that falls behind by more
//! than the channel capacity sees `Lagged` and skips ahead.

use tokio::sync::broadcast;

use crate::models::{BuildEvent, BuildEventMessage};

/// Default capacity for the broadcast channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Distributes stamped build events to all subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<BuildEventMessage>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receiver for events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEventMessage> {
        self.sender.subscribe()
    }

    /// Stamp and broadcast a build event. Returns the number of subscribers
    /// reached; with none listening the event is dropped.
    pub fn emit(&self, event: BuildEvent) -> usize {
        self.sender
            .send(BuildEventMessage::new(event))
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber() {
        let broadcaster = EventBroadcaster::new();

        let mut watcher = broadcaster.subscribe();
        let mut other = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        let build_id = Uuid::now_v7();
        let count = broadcaster.emit(BuildEvent::BuildCreated { build_id });
        assert_eq!(count, 2);

        assert_eq!(watcher.recv().await.unwrap().event.build_id(), build_id);
        assert_eq!(other.recv().await.unwrap().event.build_id(), build_id);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let broadcaster = EventBroadcaster::new();

        let count = broadcaster.emit(BuildEvent::Expired {
            build_id: Uuid::now_v7(),
        });
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let broadcaster = EventBroadcaster::with_capacity(2);
        let mut rx = broadcaster.subscribe();

        for _ in 0..3 {
            broadcaster.emit(BuildEvent::BuildCreated {
                build_id: Uuid::now_v7(),
            });
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
        assert!(rx.recv().await.is_ok());
    }
}
